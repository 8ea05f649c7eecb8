//! Background continuity worker.
//!
//! Runs as its own task with a mailbox and keeps re-sending the latest known
//! position on a fixed interval, independently of the foreground sampler.
//! It only talks to the outside through [`WorkerCommand`]s.
//!
//! Sends go through whichever [`Relay`] the worker was spawned with. The
//! service hands it the configured sink: the remote endpoint by default, the
//! shared store when `RELAY_SINK=local`, so background sends land where the
//! foreground ones do.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::models::{RawSample, WorkerCommand};
use crate::processor::transform;
use crate::relay::Relay;

pub const MAILBOX_CAPACITY: usize = 32;

#[derive(Debug)]
enum WorkerMsg {
    Command(WorkerCommand),
    Status(oneshot::Sender<WorkerStatus>),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatus {
    pub running: bool,
    pub device_id: Option<String>,
    pub cached: Option<RawSample>,
}

/// A tracking session, alive between START and STOP.
struct Session {
    device_id: String,
    ticker: Interval,
    cache: Option<RawSample>,
}

struct BackgroundWorker {
    relay: Arc<dyn Relay>,
    period: Duration,
    session: Option<Session>,
}

/// Mailbox address of a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerMsg>,
}

impl WorkerHandle {
    pub async fn send(&self, command: WorkerCommand) -> Result<()> {
        self.tx
            .send(WorkerMsg::Command(command))
            .await
            .map_err(|_| anyhow!("background worker is gone"))
    }

    /// Non-blocking send for synchronous callers; fails when the mailbox is full.
    pub fn try_send(&self, command: WorkerCommand) -> Result<()> {
        self.tx
            .try_send(WorkerMsg::Command(command))
            .map_err(|e| anyhow!("background worker mailbox: {}", e))
    }

    pub async fn status(&self) -> Result<WorkerStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::Status(reply))
            .await
            .map_err(|_| anyhow!("background worker is gone"))?;
        Ok(rx.await?)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(WorkerMsg::Shutdown).await;
    }
}

/// Spawns a fresh worker: Idle, empty cache.
pub fn spawn(relay: Arc<dyn Relay>, period: Duration) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let worker = BackgroundWorker {
        relay,
        period,
        session: None,
    };
    let task = tokio::spawn(worker.run(rx));
    (WorkerHandle { tx }, task)
}

async fn next_tick(session: &mut Option<Session>) {
    match session {
        Some(session) => {
            session.ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl BackgroundWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerMsg>) {
        info!("Background worker ready (every {:?})", self.period);

        loop {
            tokio::select! {
                biased;

                msg = rx.recv() => match msg {
                    Some(WorkerMsg::Command(command)) => self.handle(command),
                    Some(WorkerMsg::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(WorkerMsg::Shutdown) | None => break,
                },
                _ = next_tick(&mut self.session) => self.on_tick(),
            }
        }

        info!("Background worker exiting");
    }

    fn handle(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::StartTracking { device_id } => {
                // First tick is one full period away.
                let Some(first) = Instant::now().checked_add(self.period) else {
                    warn!(
                        "Background interval {:?} is out of range, not tracking {}",
                        self.period, device_id
                    );
                    return;
                };
                let mut ticker = tokio::time::interval_at(first, self.period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                if self.session.is_some() {
                    info!("Restarting background tracking for {}", device_id);
                } else {
                    info!("Background tracking started for {}", device_id);
                }
                self.session = Some(Session {
                    device_id,
                    ticker,
                    cache: None,
                });
            }
            WorkerCommand::StopTracking => {
                if let Some(session) = self.session.take() {
                    info!("Background tracking stopped for {}", session.device_id);
                }
            }
            WorkerCommand::UpdatePosition { position } => match self.session.as_mut() {
                Some(session) => session.cache = Some(position),
                None => debug!("Ignoring position update while idle"),
            },
        }
    }

    fn on_tick(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let Some(sample) = session.cache.as_ref() else {
            debug!("Tick with no position yet");
            return;
        };

        let record = transform::to_record(&session.device_id, sample, transform::now_millis());
        let relay = self.relay.clone();
        tokio::spawn(async move {
            match relay.send(&record).await {
                Ok(ack) => debug!("Background send for {} ok ({})", record.device_id, ack),
                Err(e) => warn!(
                    "Background send via {} for {} failed: {}",
                    relay.name(),
                    record.device_id,
                    e
                ),
            }
        });
    }

    fn status(&self) -> WorkerStatus {
        match &self.session {
            Some(session) => WorkerStatus {
                running: true,
                device_id: Some(session.device_id.clone()),
                cached: session.cache.clone(),
            },
            None => WorkerStatus {
                running: false,
                device_id: None,
                cached: None,
            },
        }
    }
}

//! Foreground tracker: sampler, transformer, relay and worker wired together,
//! plus the status board an operator watches.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::models::WorkerCommand;
use crate::processor::transform;
use crate::relay::{Relay, SendError};
use crate::sampler::{PositionSource, Sampler, SamplerError, SamplerEvent};
use crate::worker::WorkerHandle;

/// How long a send confirmation stays on the board.
pub const CONFIRMATION_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Default)]
struct Board {
    tracking: bool,
    sent: u64,
    last_sent: Option<i64>,
    last_error: Option<String>,
    confirmation: Option<(String, Instant)>,
}

type SharedBoard = Arc<Mutex<Board>>;

fn lock(board: &SharedBoard) -> std::sync::MutexGuard<'_, Board> {
    board.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub tracking: bool,
    pub sent: u64,
    pub last_sent: Option<i64>,
    pub last_error: Option<String>,
    pub confirmation: Option<String>,
}

pub struct Tracker<S: PositionSource> {
    device_id: String,
    sampler: Sampler<S>,
    relay: Arc<dyn Relay>,
    worker: Option<WorkerHandle>,
    board: SharedBoard,
}

impl<S: PositionSource> Tracker<S> {
    pub fn new(
        device_id: String,
        sampler: Sampler<S>,
        relay: Arc<dyn Relay>,
        worker: Option<WorkerHandle>,
    ) -> Self {
        Self {
            device_id,
            sampler,
            relay,
            worker,
            board: Arc::new(Mutex::new(Board::default())),
        }
    }

    pub async fn start(&mut self) -> Result<(), SamplerError> {
        if self.sampler.is_running() {
            return Ok(());
        }

        let handler = self.handler();
        if let Err(e) = self.sampler.start(handler).await {
            error!("Cannot start tracking: {}", e);
            let mut board = lock(&self.board);
            board.tracking = false;
            board.last_error = Some(e.to_string());
            return Err(e);
        }

        {
            let mut board = lock(&self.board);
            board.tracking = true;
            board.last_error = None;
        }
        if let Some(worker) = &self.worker {
            let command = WorkerCommand::StartTracking {
                device_id: self.device_id.clone(),
            };
            if let Err(e) = worker.send(command).await {
                warn!("Background worker not started: {}", e);
            }
        }
        info!("Tracking {} via {} sink", self.device_id, self.relay.name());
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.sampler.stop().await;
        if let Some(worker) = &self.worker {
            if let Err(e) = worker.send(WorkerCommand::StopTracking).await {
                warn!("Background worker not stopped: {}", e);
            }
        }
        lock(&self.board).tracking = false;
        info!("Tracking stopped for {}", self.device_id);
    }

    pub fn status(&self) -> StatusSnapshot {
        let board = lock(&self.board);
        StatusSnapshot {
            tracking: board.tracking && self.sampler.is_running(),
            sent: board.sent,
            last_sent: board.last_sent,
            last_error: board.last_error.clone(),
            confirmation: board
                .confirmation
                .as_ref()
                .filter(|(_, at)| at.elapsed() < CONFIRMATION_TTL)
                .map(|(message, _)| message.clone()),
        }
    }

    fn handler(&self) -> impl FnMut(SamplerEvent) + Send + 'static {
        let device_id = self.device_id.clone();
        let relay = self.relay.clone();
        let worker = self.worker.clone();
        let board = self.board.clone();

        move |event| match event {
            SamplerEvent::Fix(sample) => {
                let record = transform::to_record(&device_id, &sample, transform::now_millis());
                debug!("Fix {} {}, {}", record.device_id, record.lat, record.lng);

                if let Some(worker) = &worker {
                    let update = WorkerCommand::UpdatePosition { position: sample };
                    if let Err(e) = worker.try_send(update) {
                        warn!("Dropped worker position update: {}", e);
                    }
                }

                // Fire and forget; the next fix is the retry.
                let relay = relay.clone();
                let board = board.clone();
                tokio::spawn(async move {
                    let result = relay.send(&record).await;
                    let mut board = lock(&board);
                    match result {
                        Ok(ack) => {
                            board.sent += 1;
                            board.last_sent = Some(transform::now_millis());
                            board.last_error = None;
                            board.confirmation =
                                Some(("Location sent".to_string(), Instant::now()));
                            info!(
                                "Sent location #{} for {} ({})",
                                board.sent, record.device_id, ack
                            );
                        }
                        Err(e) => {
                            match &e {
                                SendError::Rejected { status, message } => error!(
                                    "Send rejected for {} (HTTP {}): {}",
                                    record.device_id, status, message
                                ),
                                _ => error!("Send failed for {}: {}", record.device_id, e),
                            }
                            board.last_error = Some(e.to_string());
                        }
                    }
                });
            }
            SamplerEvent::Error { error, terminal } => {
                let mut board = lock(&board);
                board.last_error = Some(error.to_string());
                if terminal {
                    board.tracking = false;
                    warn!("Tracking for {} stopped: {}", device_id, error);
                }
            }
        }
    }
}

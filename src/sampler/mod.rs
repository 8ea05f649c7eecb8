//! Location sampling on top of the host's location service.
//!
//! A [`Sampler`] owns at most one active run (its [`WatchHandle`]) and feeds
//! every fix or fix error to the handler it was started with.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::RawSample;

pub mod gpsd;

pub use gpsd::GpsdSource;

pub const DEFAULT_FIX_TIMEOUT: Duration = Duration::from_secs(15);

/// Stream of fixes produced by a long-lived subscription.
pub type FixStream = BoxStream<'static, Result<RawSample, FixError>>;

/// A single fix attempt failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FixError {
    #[error("location permission denied: {0}")]
    PermissionDenied(String),

    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("no fix within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplerError {
    #[error("location services unavailable: {0}")]
    CapabilityUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct FixOptions {
    pub high_accuracy: bool,
    /// Upper bound on a single fix attempt.
    pub timeout: Duration,
    /// Oldest cached fix a source may hand back; zero means always fresh.
    pub maximum_age: Duration,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: DEFAULT_FIX_TIMEOUT,
            maximum_age: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMode {
    /// Subscribe to the source and emit every fix it produces.
    Continuous,
    /// Ask for a one-shot fix once per period.
    Interval(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SamplerEvent {
    Fix(RawSample),
    /// `terminal` is set when the run ended because of this error.
    Error { error: FixError, terminal: bool },
}

/// The host location capability.
#[async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// Checks that location services exist at all.
    async fn probe(&self) -> Result<(), SamplerError>;

    async fn current_position(&self, options: &FixOptions) -> Result<RawSample, FixError>;

    async fn subscribe(&self, options: &FixOptions) -> Result<FixStream, SamplerError>;
}

/// Owned handle on an active sampling run.
pub struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Ends the run. Once this returns the handler has been dropped.
    async fn cancel(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

pub struct Sampler<S: PositionSource> {
    source: Arc<S>,
    mode: SamplingMode,
    options: FixOptions,
    watch: Option<WatchHandle>,
}

impl<S: PositionSource> Sampler<S> {
    pub fn new(source: Arc<S>, mode: SamplingMode, options: FixOptions) -> Self {
        Self {
            source,
            mode,
            options,
            watch: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.watch.as_ref().is_some_and(WatchHandle::is_active)
    }

    /// Starts emitting events to `handler`. A no-op while a run is active.
    pub async fn start<F>(&mut self, handler: F) -> Result<(), SamplerError>
    where
        F: FnMut(SamplerEvent) + Send + 'static,
    {
        if self.is_running() {
            debug!("Sampler already running, ignoring start");
            return Ok(());
        }
        // Reap a run that ended on its own.
        if let Some(finished) = self.watch.take() {
            finished.cancel().await;
        }

        self.source.probe().await?;

        let source = self.source.clone();
        let options = self.options.clone();
        let task = match self.mode {
            SamplingMode::Continuous => {
                let stream = self.source.subscribe(&self.options).await?;
                tokio::spawn(watch_loop(source, options, stream, handler))
            }
            SamplingMode::Interval(period) => {
                tokio::spawn(poll_loop(source, options, period, handler))
            }
        };
        info!(
            "Sampler started ({:?}, high accuracy {}, timeout {:?})",
            self.mode, self.options.high_accuracy, self.options.timeout
        );

        self.watch = Some(WatchHandle { task });
        Ok(())
    }

    /// Stops the active run, if any. No handler call happens after this returns.
    pub async fn stop(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.cancel().await;
            info!("Sampler stopped");
        }
    }
}

async fn fix_within<F>(timeout: Duration, fix: F) -> Result<RawSample, FixError>
where
    F: Future<Output = Result<RawSample, FixError>>,
{
    tokio::time::timeout(timeout, fix)
        .await
        .unwrap_or(Err(FixError::Timeout(timeout)))
}

async fn watch_loop<S, F>(source: Arc<S>, options: FixOptions, mut stream: FixStream, mut handler: F)
where
    S: PositionSource,
    F: FnMut(SamplerEvent),
{
    // Immediate fix so the first sample does not wait on the watch cadence.
    match fix_within(options.timeout, source.current_position(&options)).await {
        Ok(sample) => handler(SamplerEvent::Fix(sample)),
        Err(error) => {
            warn!("Initial fix failed: {}", error);
            handler(SamplerEvent::Error {
                error,
                terminal: false,
            });
        }
    }

    loop {
        let next = match tokio::time::timeout(options.timeout, stream.next()).await {
            Ok(Some(next)) => next,
            Ok(None) => Err(FixError::PositionUnavailable(
                "location stream ended".to_string(),
            )),
            Err(_) => Err(FixError::Timeout(options.timeout)),
        };

        match next {
            Ok(sample) => handler(SamplerEvent::Fix(sample)),
            Err(error) => {
                warn!("Watch ended: {}", error);
                handler(SamplerEvent::Error {
                    error,
                    terminal: true,
                });
                break;
            }
        }
    }
}

async fn poll_loop<S, F>(source: Arc<S>, options: FixOptions, period: Duration, mut handler: F)
where
    S: PositionSource,
    F: FnMut(SamplerEvent),
{
    // First tick completes at once.
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match fix_within(options.timeout, source.current_position(&options)).await {
            Ok(sample) => handler(SamplerEvent::Fix(sample)),
            Err(error) => {
                warn!("Fix failed: {}", error);
                handler(SamplerEvent::Error {
                    error,
                    terminal: false,
                });
            }
        }
    }
}

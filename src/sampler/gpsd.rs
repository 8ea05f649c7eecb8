//! gpsd client: the host location service on Linux devices.
//!
//! Speaks the gpsd JSON protocol over TCP and turns `TPV` reports carrying
//! a 2D or 3D fix into [`RawSample`]s.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::{FixError, FixOptions, FixStream, PositionSource, SamplerError};
use crate::models::RawSample;

const WATCH_COMMAND: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

type ReportLines = Lines<BufReader<TcpStream>>;

/// gpsd report, only the TPV fields we use.
#[derive(Debug, Deserialize)]
struct Report {
    class: String,
    #[serde(default)]
    mode: Option<u8>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    speed: Option<f64>, // m/s
    #[serde(default)]
    track: Option<f64>, // degrees from true north
    #[serde(default)]
    eph: Option<f64>,
    #[serde(default)]
    epx: Option<f64>,
    #[serde(default)]
    epy: Option<f64>,
}

impl Report {
    fn into_sample(self) -> Option<RawSample> {
        if self.class != "TPV" || self.mode.unwrap_or(0) < 2 {
            return None;
        }

        let accuracy = self.eph.or(match (self.epx, self.epy) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        });
        let fix_time = self
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp_millis());

        Some(RawSample {
            latitude: self.lat?,
            longitude: self.lon?,
            speed: self.speed,
            heading: self.track,
            accuracy,
            fix_time,
        })
    }
}

/// Parses one line of gpsd output, `None` for anything that is not a fix.
fn parse_report(line: &str) -> Option<RawSample> {
    match serde_json::from_str::<Report>(line) {
        Ok(report) => report.into_sample(),
        Err(e) => {
            debug!("Skipping gpsd line: {}", e);
            None
        }
    }
}

type Cached = Arc<Mutex<Option<(Instant, RawSample)>>>;

pub struct GpsdSource {
    addr: String,
    last_fix: Cached,
}

impl GpsdSource {
    pub fn new(addr: String) -> Self {
        Self {
            addr,
            last_fix: Arc::new(Mutex::new(None)),
        }
    }

    async fn open(&self) -> std::io::Result<ReportLines> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(WATCH_COMMAND).await?;
        Ok(BufReader::new(stream).lines())
    }

    fn cached(&self, maximum_age: Duration) -> Option<RawSample> {
        if maximum_age.is_zero() {
            return None;
        }
        let last = self.last_fix.lock().unwrap_or_else(|e| e.into_inner());
        last.as_ref()
            .filter(|(at, _)| at.elapsed() <= maximum_age)
            .map(|(_, sample)| sample.clone())
    }
}

fn remember(cache: &Cached, sample: &RawSample) {
    let mut last = cache.lock().unwrap_or_else(|e| e.into_inner());
    *last = Some((Instant::now(), sample.clone()));
}

async fn next_fix(lines: &mut ReportLines) -> Result<RawSample, FixError> {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(sample) = parse_report(&line) {
                    return Ok(sample);
                }
            }
            Ok(None) => {
                return Err(FixError::PositionUnavailable(
                    "gpsd closed the connection".to_string(),
                ))
            }
            Err(e) => return Err(FixError::PositionUnavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl PositionSource for GpsdSource {
    async fn probe(&self) -> Result<(), SamplerError> {
        match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(SamplerError::CapabilityUnavailable(format!(
                "gpsd at {}: {}",
                self.addr, e
            ))),
            Err(_) => Err(SamplerError::CapabilityUnavailable(format!(
                "gpsd at {} did not answer",
                self.addr
            ))),
        }
    }

    async fn current_position(&self, options: &FixOptions) -> Result<RawSample, FixError> {
        if let Some(sample) = self.cached(options.maximum_age) {
            return Ok(sample);
        }

        let mut lines = self.open().await.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => FixError::PermissionDenied(e.to_string()),
            _ => FixError::PositionUnavailable(e.to_string()),
        })?;
        let sample = next_fix(&mut lines).await?;
        remember(&self.last_fix, &sample);
        Ok(sample)
    }

    async fn subscribe(&self, _options: &FixOptions) -> Result<FixStream, SamplerError> {
        let lines = self.open().await.map_err(|e| {
            SamplerError::CapabilityUnavailable(format!("gpsd at {}: {}", self.addr, e))
        })?;
        info!("Watching gpsd at {}", self.addr);

        let cache = self.last_fix.clone();
        let stream = futures::stream::unfold(Some(lines), move |state| {
            let cache = cache.clone();
            async move {
                let mut lines = state?;
                match next_fix(&mut lines).await {
                    Ok(sample) => {
                        remember(&cache, &sample);
                        Some((Ok(sample), Some(lines)))
                    }
                    // Report the failure once, then end the stream.
                    Err(e) => Some((Err(e), None)),
                }
            }
        });
        Ok(stream.boxed())
    }
}

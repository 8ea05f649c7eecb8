use anyhow::{bail, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use uuid::Uuid;

/// Longest interval or timeout accepted from the environment (one day).
const MAX_DURATION_SECS: u64 = 86_400;

/// Where fixes are relayed to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Remote,
    Local,
}

/// How the sampler paces fixes.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModeKind {
    Continuous,
    Interval,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub device_id: String,
    pub relay_sink: SinkKind,
    pub relay_base_url: String,
    pub relay_endpoint: String,
    pub relay_timeout_secs: u64,
    pub gpsd_host: String,
    pub gpsd_port: u16,
    pub sampler_mode: ModeKind,
    pub sample_interval_secs: u64,
    pub fix_timeout_secs: u64,
    pub background_interval_secs: u64,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let device_id = env::var("DEVICE_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| format!("siscom-tracker-{}", Uuid::new_v4()));

        let relay_sink = match env::var("RELAY_SINK")
            .unwrap_or_else(|_| "remote".to_string())
            .to_lowercase()
            .as_str()
        {
            "remote" => SinkKind::Remote,
            "local" => SinkKind::Local,
            other => bail!("unknown RELAY_SINK '{}', expected remote or local", other),
        };
        let relay_base_url =
            env::var("RELAY_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
        let relay_endpoint =
            env::var("RELAY_ENDPOINT").unwrap_or_else(|_| "/api/mobile/location".to_string());
        let relay_timeout_secs = parse_or("RELAY_TIMEOUT_SECS", 10);

        let gpsd_host = env::var("GPSD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let gpsd_port = parse_or("GPSD_PORT", 2947);

        let sampler_mode = match env::var("SAMPLER_MODE")
            .unwrap_or_else(|_| "continuous".to_string())
            .to_lowercase()
            .as_str()
        {
            "continuous" => ModeKind::Continuous,
            "interval" => ModeKind::Interval,
            other => bail!(
                "unknown SAMPLER_MODE '{}', expected continuous or interval",
                other
            ),
        };
        let sample_interval_secs = parse_or("SAMPLE_INTERVAL_SECS", 5);
        let fix_timeout_secs = parse_or("FIX_TIMEOUT_SECS", 15);
        let background_interval_secs = parse_or("BACKGROUND_INTERVAL_SECS", 30);

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let config = Self {
            device_id,
            relay_sink,
            relay_base_url,
            relay_endpoint,
            relay_timeout_secs,
            gpsd_host,
            gpsd_port,
            sampler_mode,
            sample_interval_secs,
            fix_timeout_secs,
            background_interval_secs,
            log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let durations = [
            ("RELAY_TIMEOUT_SECS", self.relay_timeout_secs),
            ("SAMPLE_INTERVAL_SECS", self.sample_interval_secs),
            ("FIX_TIMEOUT_SECS", self.fix_timeout_secs),
            ("BACKGROUND_INTERVAL_SECS", self.background_interval_secs),
        ];
        for (name, secs) in durations {
            if secs == 0 {
                bail!("{} must be greater than zero", name);
            }
            if secs > MAX_DURATION_SECS {
                bail!("{} must be at most {} seconds", name, MAX_DURATION_SECS);
            }
        }
        if self.relay_sink == SinkKind::Remote && reqwest::Url::parse(&self.endpoint_url()).is_err()
        {
            bail!("invalid relay endpoint '{}'", self.endpoint_url());
        }
        Ok(())
    }

    /// Full URL the remote sink posts to.
    pub fn endpoint_url(&self) -> String {
        format!(
            "{}/{}",
            self.relay_base_url.trim_end_matches('/'),
            self.relay_endpoint.trim_start_matches('/')
        )
    }

    pub fn gpsd_addr(&self) -> String {
        format!("{}:{}", self.gpsd_host, self.gpsd_port)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_secs(self.fix_timeout_secs)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

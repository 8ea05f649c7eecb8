//! Delivery of location records to a sink.
//!
//! Every sink reports back through `Result<Ack, SendError>`; nothing here
//! retries. The next scheduled sample is the only retry.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::LocationRecord;

pub mod local;
pub mod remote;

pub use local::LocalSink;
pub use remote::RemoteSink;

/// Proof of delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    /// The endpoint answered with a 2xx status.
    Remote { status: u16 },
    /// The record was written to the shared store under `key`.
    Local { key: String, observers: usize },
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ack::Remote { status } => write!(f, "HTTP {}", status),
            Ack::Local { key, observers } => write!(f, "{} -> {} observers", key, observers),
        }
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    /// Non-2xx answer; `message` is the body's `error` field or `HTTP <code>`.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Relay: Send + Sync {
    async fn send(&self, record: &LocationRecord) -> Result<Ack, SendError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

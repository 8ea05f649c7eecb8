use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{Ack, Relay, SendError};
use crate::models::LocationRecord;

/// Error body the backend sends along with a failed status.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// POSTs records as JSON to the backend location endpoint.
#[derive(Clone)]
pub struct RemoteSink {
    client: Client,
    endpoint: String,
}

impl RemoteSink {
    pub fn new(endpoint: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build relay HTTP client")?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Relay for RemoteSink {
    async fn send(&self, record: &LocationRecord) -> Result<Ack, SendError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("Relayed {} -> {} ({})", record.device_id, self.endpoint, status);
            return Ok(Ack::Remote {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.unwrap_or_default();
        Err(SendError::Rejected {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Picks the backend's `error` string when the body carries one, the bare
/// status code otherwise.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.trim().is_empty() => parsed.error,
        _ => format!("HTTP {}", status.as_u16()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn record() -> LocationRecord {
        LocationRecord {
            device_id: "uncle-phone".to_string(),
            lat: 14.5995,
            lng: 120.9842,
            speed: Some(9.0),
            heading: None,
            accuracy: Some(5.0),
            timestamp: 1764398681921,
        }
    }

    /// Answers one request with `status` and `body`, handing back the
    /// request body it received.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];

            let header_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "client closed before sending headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };

            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < header_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            String::from_utf8_lossy(&buf[header_end..]).to_string()
        });

        (format!("http://{}/api/mobile/location", addr), handle)
    }

    #[test]
    fn test_error_message_prefers_body() {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        assert_eq!(error_message(status, r#"{"error":"db down"}"#), "db down");
        assert_eq!(error_message(status, "<html>oops</html>"), "HTTP 500");
        assert_eq!(error_message(status, ""), "HTTP 500");
        assert_eq!(error_message(status, r#"{"message":"nope"}"#), "HTTP 500");
    }

    #[tokio::test]
    async fn test_posts_json_body() {
        let (url, server) = serve_once("200 OK", r#"{"ok":true}"#).await;
        let sink = RemoteSink::new(url, Duration::from_secs(5)).unwrap();

        let ack = sink.send(&record()).await.unwrap();
        assert_eq!(ack, Ack::Remote { status: 200 });

        let body: serde_json::Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(body["deviceId"], "uncle-phone");
        assert_eq!(body["lat"], 14.5995);
        assert_eq!(body["speed"], 9.0);
        assert!(body["heading"].is_null());
        assert_eq!(body["timestamp"], 1764398681921i64);
    }

    #[tokio::test]
    async fn test_server_error_uses_body_message() {
        let (url, server) =
            serve_once("500 Internal Server Error", r#"{"error":"db down"}"#).await;
        let sink = RemoteSink::new(url, Duration::from_secs(5)).unwrap();

        let err = sink.send(&record()).await.unwrap_err();
        assert_eq!(err.to_string(), "db down");
        match err {
            SendError::Rejected { status, .. } => assert_eq!(status, 500),
            other => panic!("expected rejection, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_falls_back_to_status() {
        let (url, server) = serve_once("500 Internal Server Error", "not json at all").await;
        let sink = RemoteSink::new(url, Duration::from_secs(5)).unwrap();

        let err = sink.send(&record()).await.unwrap_err();
        assert_eq!(err.to_string(), "HTTP 500");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = RemoteSink::new(format!("http://{}/x", addr), Duration::from_secs(5)).unwrap();
        let err = sink.send(&record()).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
    }
}

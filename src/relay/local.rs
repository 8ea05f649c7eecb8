use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Ack, Relay, SendError};
use crate::models::LocationRecord;
use crate::store::{SharedStore, StorageEvent};

/// Publishes records into the shared store for other contexts on this host.
pub struct LocalSink {
    store: Arc<SharedStore>,
}

impl LocalSink {
    pub fn new(store: Arc<SharedStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Relay for LocalSink {
    async fn send(&self, record: &LocationRecord) -> Result<Ack, SendError> {
        let key = record.store_key();
        let value = serde_json::to_string(record)?;

        let old_value = self.store.set_item(&key, value.clone());
        // Observers are told explicitly, one event per write.
        let observers = self.store.notify(StorageEvent {
            key: key.clone(),
            old_value,
            new_value: value,
        });
        debug!("Stored {} ({} observers)", key, observers);

        Ok(Ack::Local { key, observers })
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[tokio::test]
    async fn test_local_sink_round_trip_and_single_event() {
        let store = Arc::new(SharedStore::new());
        let mut rx = store.subscribe();
        let sink = LocalSink::new(store.clone());

        let ack = sink.send(&record()).await.unwrap();
        assert_eq!(
            ack,
            Ack::Local {
                key: "gpsData_uncle-phone".to_string(),
                observers: 1
            }
        );

        let stored = store.get_item("gpsData_uncle-phone").unwrap();
        let decoded: LocationRecord = serde_json::from_str(&stored).unwrap();
        assert_eq!(decoded, record());

        let event = rx.try_recv().unwrap();
        assert_eq!(event.key, "gpsData_uncle-phone");
        assert_eq!(event.old_value, None);
        assert_eq!(event.new_value, stored);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_sink_overwrites_previous() {
        let store = Arc::new(SharedStore::new());
        let sink = LocalSink::new(store.clone());

        let first = record();
        let mut second = record();
        second.lat = 14.6;
        sink.send(&first).await.unwrap();

        let mut rx = store.subscribe();
        sink.send(&second).await.unwrap();

        let event = rx.try_recv().unwrap();
        assert!(event.old_value.unwrap().contains("14.5995"));
        let decoded: LocationRecord =
            serde_json::from_str(&store.get_item("gpsData_uncle-phone").unwrap()).unwrap();
        assert_eq!(decoded, second);
    }
}

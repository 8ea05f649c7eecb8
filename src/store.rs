//! Process-wide key/value store shared by every tracker context.
//!
//! Writers publish a change explicitly after writing so observers in other
//! contexts hear about it right away instead of polling the map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::models::LocationRecord;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageEvent {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: String,
}

pub struct SharedStore {
    entries: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<StorageEvent>,
}

impl SharedStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    #[cfg(test)]
    pub fn get_item(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Stores `value` under `key`, last write wins. Returns the previous value.
    /// Does not notify; call [`SharedStore::notify`] once the write is done.
    pub fn set_item(&self, key: &str, value: String) -> Option<String> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value)
    }

    /// Broadcasts a change for `key`. Returns how many observers heard it.
    pub fn notify(&self, event: StorageEvent) -> usize {
        // No observers is not an error.
        self.changes.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.changes.subscribe()
    }
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Follows one key and logs every record written under it, like a second
/// tab watching the device.
pub async fn observe(store: Arc<SharedStore>, key: String) {
    let mut rx = store.subscribe();
    info!("Observing shared store key {}", key);

    loop {
        match rx.recv().await {
            Ok(event) if event.key == key => {
                if event.old_value.is_none() {
                    debug!("First value under {}", key);
                }
                match serde_json::from_str::<LocationRecord>(&event.new_value) {
                    Ok(record) => info!(
                        "Observed {} at {}, {} (speed {:?} km/h)",
                        record.device_id, record.lat, record.lng, record.speed
                    ),
                    Err(e) => warn!("Unreadable value under {}: {}", key, e),
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Observer for {} skipped {} changes", key, n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let store = SharedStore::new();
        assert_eq!(store.set_item("k", "a".to_string()), None);
        assert_eq!(store.set_item("k", "b".to_string()), Some("a".to_string()));
        assert_eq!(store.get_item("k"), Some("b".to_string()));
        assert_eq!(store.get_item("missing"), None);
    }

    #[test]
    fn test_set_does_not_notify() {
        let store = SharedStore::new();
        let mut rx = store.subscribe();
        store.set_item("k", "a".to_string());
        assert!(rx.try_recv().is_err());

        let heard = store.notify(StorageEvent {
            key: "k".to_string(),
            old_value: None,
            new_value: "a".to_string(),
        });
        assert_eq!(heard, 1);
        assert_eq!(rx.try_recv().unwrap().key, "k");
    }

    #[test]
    fn test_notify_without_observers() {
        let store = SharedStore::new();
        let heard = store.notify(StorageEvent {
            key: "k".to_string(),
            old_value: None,
            new_value: String::new(),
        });
        assert_eq!(heard, 0);
    }
}

use serde::{Deserialize, Serialize};

use super::sample::RawSample;

/// Control messages accepted by the background worker's mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    StartTracking {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
    StopTracking,
    UpdatePosition {
        position: RawSample,
    },
}

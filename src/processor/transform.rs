use chrono::Utc;

use crate::models::{LocationRecord, RawSample};

/// m/s to km/h.
const MPS_TO_KMH: f64 = 3.6;

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalizes a raw platform fix into the record every sink receives.
///
/// Speed is converted to km/h when the platform reported one and stays
/// `None` otherwise, so a stationary device (`0`) is never confused with an
/// unknown speed. Heading and accuracy pass through untouched, absent stays
/// absent. The timestamp is the caller's construction time, not the
/// platform fix time.
pub fn to_record(device_id: &str, sample: &RawSample, timestamp: i64) -> LocationRecord {
    LocationRecord {
        device_id: device_id.to_string(),
        lat: sample.latitude,
        lng: sample.longitude,
        speed: sample.speed.map(|s| s * MPS_TO_KMH),
        heading: sample.heading,
        accuracy: sample.accuracy,
        timestamp,
    }
}

use serde::{Deserialize, Serialize};

/// Key prefix used when a record is published to the shared store.
pub const STORE_KEY_PREFIX: &str = "gpsData_";

/// Canonical location record relayed to every sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub device_id: String,
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,   // km/h
    pub heading: Option<f64>, // degrees
    pub accuracy: Option<f64>, // metres
    pub timestamp: i64,       // ms since epoch, set at construction
}

impl LocationRecord {
    /// Shared store key this record is published under.
    pub fn store_key(&self) -> String {
        store_key(&self.device_id)
    }
}

pub fn store_key(device_id: &str) -> String {
    format!("{}{}", STORE_KEY_PREFIX, device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape_keeps_nulls() {
        let record = LocationRecord {
            device_id: "0848086072".to_string(),
            lat: 20.652494,
            lng: -100.391404,
            speed: None,
            heading: None,
            accuracy: Some(12.0),
            timestamp: 1764396915000,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["deviceId"], "0848086072");
        assert_eq!(value["lng"], -100.391404);
        assert!(value["speed"].is_null());
        assert!(value["heading"].is_null());
        assert_eq!(value["accuracy"], 12.0);
        assert_eq!(value["timestamp"], 1764396915000i64);
    }

    #[test]
    fn test_store_key() {
        assert_eq!(store_key("uncle-phone"), "gpsData_uncle-phone");
    }
}

use serde::{Deserialize, Serialize};

/// A single fix as reported by the host location service.
///
/// Speed is in m/s and accuracy in metres, exactly as the platform reports
/// them. `fix_time` is the platform's own timestamp (ms) when it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSample {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub fix_time: Option<i64>,
}

impl RawSample {
    #[cfg(test)]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            speed: None,
            heading: None,
            accuracy: None,
            fix_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsing_sparse_position() {
        let payload = r#"{ "latitude": 14.5995, "longitude": 120.9842, "speed": null }"#;

        let sample: RawSample = serde_json::from_str(payload).unwrap();
        assert_eq!(sample.latitude, 14.5995);
        assert_eq!(sample.longitude, 120.9842);
        assert_eq!(sample.speed, None);
        assert_eq!(sample.heading, None);
        assert_eq!(sample.fix_time, None);
    }
}

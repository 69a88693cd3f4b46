use crate::ambient::AmbientReading;
use crate::clock::Timestamp;
use crate::errors::Result;
use crate::occupancy::OccupancyStatus;
use serde::Serialize;

/// One upload's worth of state. Field order is the wire key order.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: Timestamp,
    /// `null` when the last ranging cycle got no echo.
    #[serde(serialize_with = "fixed2::option")]
    pub distance: Option<f32>,
    #[serde(rename = "parkingStatus")]
    pub parking_status: OccupancyStatus,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "fixed2::option"
    )]
    pub temperature: Option<f32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "fixed2::option"
    )]
    pub humidity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<String>,
}

impl TelemetryRecord {
    pub fn new(
        timestamp: Timestamp,
        distance: Option<f32>,
        parking_status: OccupancyStatus,
        ambient: Option<&AmbientReading>,
    ) -> Self {
        Self {
            timestamp,
            distance,
            parking_status,
            temperature: ambient.and_then(|a| a.temperature_c),
            humidity: ambient.and_then(|a| a.humidity_pct),
            weather: ambient.and_then(|a| a.description.clone()),
        }
    }

    pub fn encode(&self) -> Result<EncodedRecord> {
        Ok(EncodedRecord(serde_json::to_string(self)?))
    }
}

/// A JSON body ready to POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedRecord(String);

impl EncodedRecord {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Numbers go out with exactly two decimals regardless of locale.
mod fixed2 {
    use serde::ser::Error;
    use serde::{Serialize, Serializer};
    use serde_json::value::RawValue;

    pub fn option<S: Serializer>(value: &Option<f32>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.is_finite() => {
                let raw = RawValue::from_string(format!("{:.2}", v)).map_err(S::Error::custom)?;
                raw.serialize(serializer)
            }
            Some(v) => Err(S::Error::custom(format!("non-finite number {}", v))),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn ts() -> Timestamp {
        Timestamp(
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2025, 3, 26, 18, 45, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_minimal_record() {
        let record = TelemetryRecord::new(ts(), Some(8.575), OccupancyStatus::Occupied, None);
        let encoded = record.encode().unwrap();
        assert_eq!(
            encoded.as_str(),
            r#"{"timestamp":"2025-03-26 18:45:00","distance":8.57,"parkingStatus":"Occupied"}"#
        );
    }

    #[test]
    fn test_full_record_key_order_and_precision() {
        let ambient = AmbientReading {
            temperature_c: Some(14.623),
            humidity_pct: Some(81.0),
            description: Some("light rain".to_string()),
        };
        let record = TelemetryRecord::new(ts(), Some(150.0), OccupancyStatus::Free, Some(&ambient));
        assert_eq!(
            record.encode().unwrap().as_str(),
            r#"{"timestamp":"2025-03-26 18:45:00","distance":150.00,"parkingStatus":"Free","temperature":14.62,"humidity":81.00,"weather":"light rain"}"#
        );
    }

    #[test]
    fn test_timeout_distance_is_null() {
        let record = TelemetryRecord::new(ts(), None, OccupancyStatus::Free, None);
        let value: serde_json::Value = serde_json::from_str(record.encode().unwrap().as_str()).unwrap();
        assert!(value["distance"].is_null());
        assert_ne!(value["distance"], serde_json::json!(0));
    }

    #[test]
    fn test_strings_are_escaped() {
        let ambient = AmbientReading {
            temperature_c: None,
            humidity_pct: None,
            description: Some("say \"hi\"\n".to_string()),
        };
        let record = TelemetryRecord::new(ts(), Some(30.0), OccupancyStatus::Free, Some(&ambient));
        let encoded = record.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(encoded.as_str()).unwrap();
        assert_eq!(value["weather"], "say \"hi\"\n");
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_non_finite_is_rejected() {
        let record = TelemetryRecord::new(ts(), Some(f32::INFINITY), OccupancyStatus::Free, None);
        assert!(record.encode().is_err());
    }
}

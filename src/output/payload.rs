use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::devices::Reading;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Decoded form of a queued payload. Field order is part of the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    pub timestamp: String,
    pub place: String,
    pub device_id: String,
    pub measures: Reading,
}

/// Local wall-clock time at second precision.
pub fn now_string() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode(reading: &Reading, place: &str, device_id: u8) -> String {
        Self::encode_at(reading, place, device_id, &now_string())
    }

    /// Compact JSON, UTF-8 kept as is.
    pub fn encode_at(reading: &Reading, place: &str, device_id: u8, timestamp: &str) -> String {
        #[derive(Serialize)]
        struct Body<'a> {
            timestamp: &'a str,
            place: &'a str,
            device_id: String,
            measures: &'a Reading,
        }

        let body = Body {
            timestamp,
            place,
            device_id: device_id.to_string(),
            measures: reading,
        };
        // A struct of strings and finite-or-null floats cannot fail to serialize.
        serde_json::to_string(&body).unwrap_or_default()
    }

    pub fn decode(payload: &str) -> Result<MessageBody, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reading() -> Reading {
        let mut reading = Reading::new();
        reading.insert("ac_v_a", 230.4);
        reading.insert("ac_i_a", 1.234);
        reading.insert("ac_freq", 60.0);
        reading
    }

    #[test]
    fn test_encode_is_compact_and_ordered() {
        let payload = PayloadCodec::encode_at(&sample_reading(), "站A", 3, "2024-05-01 12:00:00");
        assert_eq!(
            payload,
            r#"{"timestamp":"2024-05-01 12:00:00","place":"站A","device_id":"3","measures":{"ac_v_a":230.4,"ac_i_a":1.234,"ac_freq":60.0}}"#
        );
    }

    #[test]
    fn test_empty_reading_encodes_empty_measures() {
        let payload = PayloadCodec::encode_at(&Reading::new(), "SITE", 12, "2024-05-01 12:00:00");
        assert!(payload.ends_with(r#""device_id":"12","measures":{}}"#));
    }

    #[test]
    fn test_decode_recovers_reading_place_and_id() {
        let reading = sample_reading();
        let body = PayloadCodec::decode(&PayloadCodec::encode(&reading, "SITE-7", 250)).unwrap();
        assert_eq!(body.measures, reading);
        assert_eq!(body.measures.names(), reading.names());
        assert_eq!(body.place, "SITE-7");
        assert_eq!(body.device_id, "250");
    }

    #[test]
    fn test_timestamp_has_second_precision() {
        let ts = now_string();
        assert_eq!(ts.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok());
    }
}

use serde::Deserialize;
use time::OffsetDateTime;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct SensorMessage {
    pub(crate) mac_address: String,
    pub(crate) sensor_data: Vec<SensorDatum>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SensorDatum {
    #[serde(rename = "type")]
    pub(crate) reading_type: String,
    pub(crate) value: f64,
    pub(crate) unit: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ActionMessage {
    pub(crate) mac_address: String,
    pub(crate) command: String,
    pub(crate) status: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) timestamp: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PayloadError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("macAddress is empty")]
    EmptyAddress,
}

pub(crate) fn parse_sensor_message(payload: &[u8]) -> Result<SensorMessage, PayloadError> {
    let msg: SensorMessage = serde_json::from_slice(payload)?;
    if msg.mac_address.trim().is_empty() {
        return Err(PayloadError::EmptyAddress);
    }
    Ok(msg)
}

pub(crate) fn parse_action_message(payload: &[u8]) -> Result<ActionMessage, PayloadError> {
    let msg: ActionMessage = serde_json::from_slice(payload)?;
    if msg.mac_address.trim().is_empty() {
        return Err(PayloadError::EmptyAddress);
    }
    Ok(msg)
}

// ---------------------------------------------------------------------------
// Topic routing
// ---------------------------------------------------------------------------

/// The two inbound topics the consumer subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub sensor: String,
    pub action: String,
}

impl Topics {
    pub fn all(&self) -> [&str; 2] {
        [&self.sensor, &self.action]
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Route<'a> {
    Sensor,
    Action,
    /// Outbound `greenhouse/<mac>/<verb>` traffic published by the API side.
    DeviceCommand { mac: &'a str, verb: &'a str },
    Unknown,
}

impl<'a> Route<'a> {
    pub(crate) fn classify(topic: &'a str, topics: &Topics) -> Self {
        if topic == topics.sensor {
            Route::Sensor
        } else if topic == topics.action {
            Route::Action
        } else if let Some((mac, verb)) = split_device_topic(topic) {
            Route::DeviceCommand { mac, verb }
        } else {
            Route::Unknown
        }
    }
}

/// Extract (mac, verb) from "greenhouse/<mac>/<verb>".
fn split_device_topic(topic: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "greenhouse" && !parts[1].is_empty() && !parts[2].is_empty()
    {
        Some((parts[1], parts[2]))
    } else {
        None
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Topics {
        Topics {
            sensor: "greenhouse/sensor".into(),
            action: "greenhouse/action".into(),
        }
    }

    // -- Route::classify ------------------------------------------------------

    #[test]
    fn classify_sensor_topic() {
        assert_eq!(Route::classify("greenhouse/sensor", &topics()), Route::Sensor);
    }

    #[test]
    fn classify_action_topic() {
        assert_eq!(Route::classify("greenhouse/action", &topics()), Route::Action);
    }

    #[test]
    fn classify_is_exact_match() {
        assert_eq!(Route::classify("greenhouse/sensor/", &topics()), Route::Unknown);
        assert_eq!(Route::classify("Greenhouse/sensor", &topics()), Route::Unknown);
    }

    #[test]
    fn classify_device_command_topic() {
        assert_eq!(
            Route::classify("greenhouse/AA:BB/preset", &topics()),
            Route::DeviceCommand {
                mac: "AA:BB",
                verb: "preset"
            }
        );
    }

    #[test]
    fn classify_unknown_topic() {
        assert_eq!(Route::classify("tele/node-a/reading", &topics()), Route::Unknown);
        assert_eq!(Route::classify("greenhouse//preset", &topics()), Route::Unknown);
        assert_eq!(Route::classify("", &topics()), Route::Unknown);
    }

    #[test]
    fn configuration_topic_is_a_device_command() {
        assert_eq!(
            Route::classify("greenhouse/FF:9A:4C:98:6E:17/Configuration", &topics()),
            Route::DeviceCommand {
                mac: "FF:9A:4C:98:6E:17",
                verb: "Configuration"
            }
        );
    }

    // -- SensorMessage --------------------------------------------------------

    #[test]
    fn sensor_message_valid() {
        let json = r#"{"macAddress":"FF:9A","sensorData":[
            {"type":"temperature","value":21.5,"unit":"C"},
            {"type":"soil humidity","value":40,"unit":"%"}]}"#;
        let msg = parse_sensor_message(json.as_bytes()).unwrap();
        assert_eq!(msg.mac_address, "FF:9A");
        assert_eq!(msg.sensor_data.len(), 2);
        assert_eq!(msg.sensor_data[0].reading_type, "temperature");
        assert_eq!(msg.sensor_data[1].value, 40.0);
    }

    #[test]
    fn sensor_message_empty_batch_is_accepted() {
        let msg = parse_sensor_message(br#"{"macAddress":"FF:9A","sensorData":[]}"#).unwrap();
        assert!(msg.sensor_data.is_empty());
    }

    #[test]
    fn sensor_message_missing_field_rejected() {
        assert!(parse_sensor_message(br#"{"macAddress":"FF:9A"}"#).is_err());
    }

    #[test]
    fn sensor_message_unknown_field_rejected() {
        let json = br#"{"macAddress":"FF:9A","sensorData":[],"extra":1}"#;
        assert!(matches!(parse_sensor_message(json), Err(PayloadError::Json(_))));
    }

    #[test]
    fn sensor_message_pascal_case_rejected() {
        let json = br#"{"MacAddress":"FF:9A","SensorData":[]}"#;
        assert!(parse_sensor_message(json).is_err());
    }

    #[test]
    fn sensor_message_string_value_rejected() {
        let json = br#"{"macAddress":"FF:9A","sensorData":[{"type":"temperature","value":"hot","unit":"C"}]}"#;
        assert!(parse_sensor_message(json).is_err());
    }

    #[test]
    fn sensor_message_blank_address_rejected() {
        let json = br#"{"macAddress":"  ","sensorData":[]}"#;
        assert!(matches!(
            parse_sensor_message(json),
            Err(PayloadError::EmptyAddress)
        ));
    }

    #[test]
    fn sensor_message_not_json_rejected() {
        assert!(parse_sensor_message(b"not json").is_err());
        assert!(parse_sensor_message(b"").is_err());
    }

    // -- ActionMessage --------------------------------------------------------

    #[test]
    fn action_message_valid() {
        let json = br#"{"macAddress":"FF:9A","command":"Watering","status":true,"timestamp":"2025-05-01T12:00:00Z"}"#;
        let msg = parse_action_message(json).unwrap();
        assert_eq!(msg.command, "Watering");
        assert!(msg.status);
        assert_eq!(msg.timestamp, time::macros::datetime!(2025-05-01 12:00 UTC));
    }

    #[test]
    fn action_message_keeps_offset() {
        let json = br#"{"macAddress":"FF:9A","command":"Lighting","status":false,"timestamp":"2025-05-01T14:00:00+02:00"}"#;
        let msg = parse_action_message(json).unwrap();
        assert_eq!(msg.timestamp, time::macros::datetime!(2025-05-01 12:00 UTC));
    }

    #[test]
    fn action_message_bad_timestamp_rejected() {
        let json = br#"{"macAddress":"FF:9A","command":"Watering","status":true,"timestamp":"yesterday"}"#;
        assert!(parse_action_message(json).is_err());
    }

    #[test]
    fn action_message_string_status_rejected() {
        let json = br#"{"macAddress":"FF:9A","command":"Watering","status":"True","timestamp":"2025-05-01T12:00:00Z"}"#;
        assert!(parse_action_message(json).is_err());
    }

    #[test]
    fn action_message_blank_address_rejected() {
        let json = br#"{"macAddress":"","command":"Watering","status":true,"timestamp":"2025-05-01T12:00:00Z"}"#;
        assert!(matches!(
            parse_action_message(json),
            Err(PayloadError::EmptyAddress)
        ));
    }
}

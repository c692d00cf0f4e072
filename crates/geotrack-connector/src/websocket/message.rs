//! Wire format of the socket endpoint.

use geotrack_domain::{TimedPosition, UnitStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command understood by the receiving model store.
pub const UPDATE_COMMAND: &str = "model.update";

/// Default model name updates are addressed to.
pub const DEFAULT_MODEL: &str = "NamedGeoReferencedItem";

/// Outbound model update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub command: &'static str,
    pub model: String,
    pub id: Uuid,
    pub data: UpdateData,
}

/// Payload of a model update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpdateData {
    Position { latitude: f64, longitude: f64 },
    Status { unit_status: UnitStatus },
}

impl OutboundMessage {
    pub fn position(model: &str, id: Uuid, position: &TimedPosition) -> Self {
        Self {
            command: UPDATE_COMMAND,
            model: model.to_string(),
            id,
            data: UpdateData::Position {
                latitude: position.latitude(),
                longitude: position.longitude(),
            },
        }
    }

    pub fn status(model: &str, id: Uuid, status: UnitStatus) -> Self {
        Self {
            command: UPDATE_COMMAND,
            model: model.to_string(),
            id,
            data: UpdateData::Status {
                unit_status: status,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Message pushed by the server. Only the command is interpreted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundMessage {
    pub command: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Parse an inbound frame. Malformed payloads are an error the caller
/// logs and drops.
pub fn parse_inbound(text: &str) -> serde_json::Result<InboundMessage> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use geotrack_domain::Position;
    use serde_json::json;

    #[test]
    fn test_position_message_shape() {
        let id = Uuid::new_v4();
        let msg = OutboundMessage::position(
            DEFAULT_MODEL,
            id,
            &Position::new(50.73, 7.09).at(Utc::now()),
        );
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "command": "model.update",
                "model": "NamedGeoReferencedItem",
                "id": id.to_string(),
                "data": {"latitude": 50.73, "longitude": 7.09}
            })
        );
    }

    #[test]
    fn test_status_message_uses_code() {
        let msg = OutboundMessage::status(DEFAULT_MODEL, Uuid::nil(), UnitStatus::OnScene);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["data"], json!({"unit_status": 4}));
    }

    #[test]
    fn test_parse_inbound_is_defensive() {
        assert!(parse_inbound("not json").is_err());
        assert!(parse_inbound(r#"{"data": 1}"#).is_err());

        let ok = parse_inbound(r#"{"command": "model.ack"}"#).unwrap();
        assert_eq!(ok.command, "model.ack");
        assert!(ok.data.is_null());
    }
}

/// Event frames exchanged between the hub and its clients
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::RoomId;

/// Inbound events from client to hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientEvent {
    /// Subscribe to a room keyed by the owning user id
    JoinRoom(String),

    /// Drop one room subscription without closing the connection
    LeaveRoom(String),
}

impl ClientEvent {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Outbound events from hub to client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubEvent {
    /// Connection established confirmation
    Connected {
        connection_id: Uuid,
        server_time: i64,
    },

    /// Join acknowledgment, carries the joined room id
    RoomJoined(RoomId),

    /// Leave acknowledgment
    RoomLeft(RoomId),

    /// Current state of the room owner's configuration
    UpdatedConfig(Value),

    /// Error message for the offending client only
    Error { code: String, message: String },
}

impl HubEvent {
    pub fn connected(connection_id: Uuid) -> Self {
        HubEvent::Connected {
            connection_id,
            server_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        HubEvent::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wire name of the event, used as a metrics and log label
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::Connected { .. } => "CONNECTED",
            HubEvent::RoomJoined(_) => "ROOM_JOINED",
            HubEvent::RoomLeft(_) => "ROOM_LEFT",
            HubEvent::UpdatedConfig(_) => "UPDATED_CONFIG",
            HubEvent::Error { .. } => "ERROR",
        }
    }

    /// Serialize to JSON text for WebSocket transmission
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

}

/// Which external write path produced an update
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdateSource {
    /// The room owner's configuration document changed
    #[default]
    Config,
    /// The room owner's user profile changed
    Profile,
}

impl UpdateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateSource::Config => "config",
            UpdateSource::Profile => "profile",
        }
    }
}

/// A committed mutation reported by the external backend.
///
/// Consumed exactly once by [`super::RoomHub::dispatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEvent {
    pub room_id: String,
    #[serde(default)]
    pub source: UpdateSource,
    pub payload: Value,
}

impl UpdateEvent {
    pub fn config(room_id: impl Into<String>, payload: Value) -> Self {
        Self {
            room_id: room_id.into(),
            source: UpdateSource::Config,
            payload,
        }
    }

    pub fn profile(room_id: impl Into<String>, payload: Value) -> Self {
        Self {
            room_id: room_id.into(),
            source: UpdateSource::Profile,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_frame() {
        let evt = ClientEvent::from_json(r#"{"event":"JOIN_ROOM","data":"U1"}"#).unwrap();
        assert_eq!(evt, ClientEvent::JoinRoom("U1".to_string()));
    }

    #[test]
    fn test_leave_room_frame() {
        let evt = ClientEvent::from_json(r#"{"event":"LEAVE_ROOM","data":"U1"}"#).unwrap();
        assert_eq!(evt, ClientEvent::LeaveRoom("U1".to_string()));
    }

    #[test]
    fn test_join_room_without_data_is_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"JOIN_ROOM"}"#).is_err());
        assert!(ClientEvent::from_json(r#"{"event":"JOIN_ROOM","data":42}"#).is_err());
    }

    #[test]
    fn test_room_joined_wire_format() {
        let room = RoomId::parse("U1").unwrap();
        let json = HubEvent::RoomJoined(room).to_json().unwrap();
        assert_eq!(json, r#"{"event":"ROOM_JOINED","data":"U1"}"#);
    }

    #[test]
    fn test_updated_config_carries_payload_verbatim() {
        let payload = json!({"owner_id": "U1", "name": "My Profile", "modules": []});
        let json = HubEvent::UpdatedConfig(payload.clone()).to_json().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["event"], "UPDATED_CONFIG");
        assert_eq!(value["data"], payload);
    }

    #[test]
    fn test_error_frame() {
        let json = HubEvent::error("INVALID_ROOM", "room id is empty")
            .to_json()
            .unwrap();
        assert!(json.contains("\"event\":\"ERROR\""));
        assert!(json.contains("\"code\":\"INVALID_ROOM\""));
    }

    #[test]
    fn test_update_event_source_defaults_to_config() {
        let evt: UpdateEvent =
            serde_json::from_value(json!({"room_id": "U1", "payload": {"owner_id": "U1"}}))
                .unwrap();
        assert_eq!(evt.source, UpdateSource::Config);

        let evt: UpdateEvent = serde_json::from_value(
            json!({"room_id": "U1", "source": "profile", "payload": {"owner_id": "U1"}}),
        )
        .unwrap();
        assert_eq!(evt.source, UpdateSource::Profile);
    }
}

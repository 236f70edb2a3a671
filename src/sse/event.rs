//! Control messages and the per-subscriber meta payload
//!
//! Control events travel as `event: system` frames whose body is
//! `{"eventName": ..., "eventData": {...}}`. Recognized names map to their
//! own variants; anything else is kept as [`SystemEvent::Other`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::session::{ClientId, SessionId};

/// Event name emitted when a subscriber attaches
pub const CLIENT_CONNECTED: &str = "client:connected";
/// Event name emitted when a subscriber is removed
pub const CLIENT_CLOSED: &str = "client:closed";
/// Event name emitted when a session's stream ends
pub const STREAM_CLOSED: &str = "stream:closed";

/// Out-of-band control event
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    /// A subscriber attached to the session
    ClientConnected {
        client_id: ClientId,
        client_count: usize,
    },
    /// A subscriber was removed from the session
    ClientClosed {
        client_id: ClientId,
        client_count: usize,
    },
    /// The session's stream ended (closed or no viewers left)
    StreamClosed { session_id: SessionId },
    /// Any other named event
    Other { name: String, data: Value },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "eventName")]
    event_name: String,
    #[serde(rename = "eventData", default)]
    event_data: Value,
}

impl SystemEvent {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &str {
        match self {
            SystemEvent::ClientConnected { .. } => CLIENT_CONNECTED,
            SystemEvent::ClientClosed { .. } => CLIENT_CLOSED,
            SystemEvent::StreamClosed { .. } => STREAM_CLOSED,
            SystemEvent::Other { name, .. } => name,
        }
    }

    /// Event payload as JSON
    pub fn data(&self) -> Value {
        match self {
            SystemEvent::ClientConnected {
                client_id,
                client_count,
            }
            | SystemEvent::ClientClosed {
                client_id,
                client_count,
            } => json!({
                "clientId": client_id.as_str(),
                "clientCount": client_count,
            }),
            SystemEvent::StreamClosed { session_id } => json!({
                "sessionId": session_id.as_str(),
            }),
            SystemEvent::Other { data, .. } => data.clone(),
        }
    }

    /// Serialize the `{eventName, eventData}` envelope
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let envelope = Envelope {
            event_name: self.name().to_string(),
            event_data: self.data(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Parse an envelope back into an event.
    ///
    /// Known names with malformed data fall back to [`SystemEvent::Other`].
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let Envelope {
            event_name,
            event_data,
        } = serde_json::from_slice(body)?;

        let client = |data: &Value| -> Option<(ClientId, usize)> {
            let client_id = data
                .get("clientId")
                .and_then(Value::as_str)
                .and_then(ClientId::parse)?;
            let client_count = data.get("clientCount").and_then(Value::as_u64)? as usize;
            Some((client_id, client_count))
        };

        let parsed = match event_name.as_str() {
            CLIENT_CONNECTED => client(&event_data).map(|(client_id, client_count)| {
                SystemEvent::ClientConnected {
                    client_id,
                    client_count,
                }
            }),
            CLIENT_CLOSED => client(&event_data).map(|(client_id, client_count)| {
                SystemEvent::ClientClosed {
                    client_id,
                    client_count,
                }
            }),
            STREAM_CLOSED => event_data
                .get("sessionId")
                .and_then(Value::as_str)
                .and_then(|id| SessionId::new(id).ok())
                .map(|session_id| SystemEvent::StreamClosed { session_id }),
            _ => None,
        };

        Ok(parsed.unwrap_or(SystemEvent::Other {
            name: event_name,
            data: event_data,
        }))
    }
}

/// Body of the meta frame each subscriber receives on connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// Session the subscriber attached to
    pub session_id: String,
    /// Session creation time, milliseconds since the Unix epoch
    pub created_at: u64,
    /// Subscribers attached, including the new one
    pub client_count: usize,
    /// Id assigned to the new subscriber
    pub client_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_envelope() {
        let event = SystemEvent::ClientClosed {
            client_id: ClientId::parse("deadbeef").unwrap(),
            client_count: 0,
        };

        let body = event.to_json().unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["eventName"], "client:closed");
        assert_eq!(value["eventData"]["clientId"], "deadbeef");
        assert_eq!(value["eventData"]["clientCount"], 0);

        assert_eq!(SystemEvent::from_json(&body).unwrap(), event);
    }

    #[test]
    fn test_stream_closed_roundtrip() {
        let event = SystemEvent::StreamClosed {
            session_id: SessionId::new("ab12cd").unwrap(),
        };
        let parsed = SystemEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_unknown_event_is_other() {
        let body = br#"{"eventName":"dump:annotated","eventData":{"note":"x"}}"#;
        let event = SystemEvent::from_json(body).unwrap();

        assert_eq!(event.name(), "dump:annotated");
        assert_eq!(event.data()["note"], "x");
    }

    #[test]
    fn test_malformed_known_event_falls_back() {
        let body = br#"{"eventName":"client:connected","eventData":{"clientId":"nope"}}"#;
        let event = SystemEvent::from_json(body).unwrap();
        assert!(matches!(event, SystemEvent::Other { .. }));
    }

    #[test]
    fn test_meta_camel_case() {
        let meta = SessionMeta {
            session_id: "ab12cd".into(),
            created_at: 1_700_000_000_000,
            client_count: 1,
            client_id: "0000abcd".into(),
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["sessionId"], "ab12cd");
        assert_eq!(value["clientCount"], 1);
    }
}

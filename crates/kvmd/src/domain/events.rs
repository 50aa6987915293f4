//! Realtime channel event envelope.
//!
//! Every text frame on `/api/ws`, in either direction, is one JSON object:
//!
//! ```json
//! {"event_type": "streamer_state", "event": {"online": true}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Client → server liveness check.
pub const EVENT_PING: &str = "ping";
/// Server → client answer to [`EVENT_PING`].
pub const EVENT_PONG: &str = "pong";
/// Marks the end of the initial-state handshake.
pub const EVENT_LOOP: &str = "loop";

/// One realtime event: a tag plus an arbitrary JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub event_type: String,
    #[serde(default)]
    pub event: Value,
}

impl RealtimeEvent {
    pub fn new(event_type: impl Into<String>, event: Value) -> Self {
        Self {
            event_type: event_type.into(),
            event,
        }
    }

    /// The terminal handshake event.
    pub fn loop_marker() -> Self {
        Self::new(EVENT_LOOP, Value::Object(Default::default()))
    }

    /// The reply to a client `ping`.
    pub fn pong() -> Self {
        Self::new(EVENT_PONG, Value::Object(Default::default()))
    }

    /// Serializes to the wire form.
    pub fn to_json(&self) -> String {
        // A struct of String + Value cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parses a client frame; `None` for anything that is not an envelope.
    pub fn from_json(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_both_fields() {
        let event = RealtimeEvent::new("hid_state", json!({"online": true}));
        let value: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value, json!({"event_type": "hid_state", "event": {"online": true}}));
    }

    #[test]
    fn test_ping_without_event_field_parses() {
        let event = RealtimeEvent::from_json(r#"{"event_type": "ping"}"#).unwrap();
        assert_eq!(event.event_type, EVENT_PING);
        assert_eq!(event.event, Value::Null);
    }

    #[test]
    fn test_garbage_is_not_an_event() {
        assert!(RealtimeEvent::from_json("not json").is_none());
        assert!(RealtimeEvent::from_json(r#"{"event": 1}"#).is_none());
    }

    #[test]
    fn test_loop_and_pong_payloads_are_empty_objects() {
        assert_eq!(RealtimeEvent::loop_marker().event, json!({}));
        assert_eq!(RealtimeEvent::pong().event_type, "pong");
    }
}

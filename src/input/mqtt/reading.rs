//! Payload parsing for watched sources.
//!
//! zigbee2mqtt publishes the full device state as a JSON object; other
//! publishers may send a bare number. Availability arrives on a separate
//! `<topic>/availability` topic as `{"state":"online"}` or a plain string.

use serde_json::Value;

/// What a source message says about the watched value.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceUpdate {
    /// Raw state text, parsed later by the monitor.
    State(String),
    /// The source explicitly reported no value.
    Unavailable,
}

/// Extract `value_key` from a state payload.
///
/// Returns `None` when the message does not mention the value at all (for
/// example a battery-only update), which is not a state change.
pub fn parse_state_payload(payload: &str, value_key: &str) -> Option<SourceUpdate> {
    let payload = payload.trim();
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map.get(value_key).map(value_to_update),
        Ok(value) => Some(value_to_update(&value)),
        // Not JSON: treat the text itself as the state
        Err(_) if !payload.is_empty() => Some(SourceUpdate::State(payload.to_string())),
        Err(_) => None,
    }
}

fn value_to_update(value: &Value) -> SourceUpdate {
    match value {
        Value::Null => SourceUpdate::Unavailable,
        Value::String(s) => SourceUpdate::State(s.clone()),
        other => SourceUpdate::State(other.to_string()),
    }
}

/// Parse an availability payload into online/offline.
pub fn parse_availability(payload: &str) -> Option<bool> {
    let payload = payload.trim();
    let state = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map.get("state")?.as_str()?.to_string(),
        Ok(Value::String(s)) => s,
        _ => payload.to_string(),
    };
    match state.as_str() {
        "online" => Some(true),
        "offline" => Some(false),
        _ => None,
    }
}

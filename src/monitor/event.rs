//! Transition notifications produced by a range monitor.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

/// Bus event type fired when a value leaves its range.
pub const EVENT_OUT_OF_RANGE: &str = "heat_monitor_out_of_range";

/// Bus event type fired when a value returns to its range.
pub const EVENT_BACK_IN_RANGE: &str = "heat_monitor_back_in_range";

/// Which bound was crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutOfRangeReason {
    BelowMin,
    AboveMax,
}

/// Fields shared by both notification variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeDetails {
    pub monitor_id: String,
    pub source_id: String,
    pub current_value: f64,
    pub min_temp: f64,
    pub max_temp: f64,
}

/// A single range transition.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    OutOfRange {
        details: RangeDetails,
        reason: OutOfRangeReason,
    },
    BackInRange {
        details: RangeDetails,
    },
}

/// Flat wire form of a notification.
#[derive(Serialize)]
struct Payload<'a> {
    #[serde(flatten)]
    details: &'a RangeDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<OutOfRangeReason>,
}

impl NotificationEvent {
    /// Bus event type for this notification.
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationEvent::OutOfRange { .. } => EVENT_OUT_OF_RANGE,
            NotificationEvent::BackInRange { .. } => EVENT_BACK_IN_RANGE,
        }
    }

    pub fn details(&self) -> &RangeDetails {
        match self {
            NotificationEvent::OutOfRange { details, .. }
            | NotificationEvent::BackInRange { details } => details,
        }
    }

    pub fn reason(&self) -> Option<OutOfRangeReason> {
        match self {
            NotificationEvent::OutOfRange { reason, .. } => Some(*reason),
            NotificationEvent::BackInRange { .. } => None,
        }
    }

    /// Payload delivered with the bus message.
    pub fn payload(&self) -> serde_json::Value {
        let payload = Payload {
            details: self.details(),
            reason: self.reason(),
        };
        // Only plain numbers and strings; serialization cannot fail here.
        serde_json::to_value(payload).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn details() -> RangeDetails {
        RangeDetails {
            monitor_id: "greenhouse".to_string(),
            source_id: "zigbee2mqtt/Greenhouse".to_string(),
            current_value: 32.0,
            min_temp: 5.0,
            max_temp: 30.0,
        }
    }

    #[test]
    fn test_out_of_range_payload() {
        let event = NotificationEvent::OutOfRange {
            details: details(),
            reason: OutOfRangeReason::AboveMax,
        };
        assert_eq!(event.event_type(), EVENT_OUT_OF_RANGE);
        assert_eq!(
            event.payload(),
            json!({
                "monitor_id": "greenhouse",
                "source_id": "zigbee2mqtt/Greenhouse",
                "current_value": 32.0,
                "min_temp": 5.0,
                "max_temp": 30.0,
                "reason": "above_max",
            })
        );
    }

    #[test]
    fn test_back_in_range_payload_has_no_reason() {
        let event = NotificationEvent::BackInRange { details: details() };
        assert_eq!(event.event_type(), EVENT_BACK_IN_RANGE);
        assert!(event.payload().get("reason").is_none());
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(OutOfRangeReason::BelowMin.to_string(), "below_min");
        assert_eq!(OutOfRangeReason::AboveMax.as_ref(), "above_max");
    }
}

//! Threshold evaluation core.
//!
//! Pure, synchronous state-transition logic: a [`RangeMonitor`] owns its
//! [`ThresholdStore`] and turns observations into at most one
//! [`NotificationEvent`] per transition. Nothing here touches I/O.

pub mod event;
pub mod range_monitor;
pub mod snapshot;
pub mod thresholds;

pub use event::{
    EVENT_BACK_IN_RANGE, EVENT_OUT_OF_RANGE, NotificationEvent, OutOfRangeReason, RangeDetails,
};
pub use range_monitor::RangeMonitor;
pub use snapshot::{AttributeSnapshot, SourceInfo};
pub use thresholds::{
    DEFAULT_MAX_TEMP, DEFAULT_MIN_TEMP, RangePolicy, ThresholdKey, ThresholdPair, ThresholdStore,
};

/// Parse a raw source state into a reading.
///
/// Anything that is not a finite number (including `unavailable` or
/// `unknown`) is treated as absent.
pub fn parse_reading(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading() {
        assert_eq!(parse_reading(Some("21.5")), Some(21.5));
        assert_eq!(parse_reading(Some(" -3 ")), Some(-3.0));
        assert_eq!(parse_reading(Some("unavailable")), None);
        assert_eq!(parse_reading(Some("")), None);
        assert_eq!(parse_reading(Some("NaN")), None);
        assert_eq!(parse_reading(None), None);
    }
}

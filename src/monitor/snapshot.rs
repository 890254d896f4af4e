//! Display attributes maintained alongside the range state.

use super::thresholds::ThresholdPair;
use serde::{Deserialize, Serialize};

/// Friendly metadata for a watched source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceInfo {
    pub display_name: Option<String>,
    pub group: Option<String>,
}

/// Externally observable attributes of a monitored unit.
///
/// `current_value` and `in_range` stay `None` until a numeric reading has
/// been seen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSnapshot {
    pub source_id: String,
    pub source_display_name: Option<String>,
    pub source_group: Option<String>,
    pub min_temp: f64,
    pub max_temp: f64,
    pub current_value: Option<f64>,
    pub in_range: Option<bool>,
}

impl AttributeSnapshot {
    pub fn new(source_id: impl Into<String>, pair: ThresholdPair) -> Self {
        Self {
            source_id: source_id.into(),
            source_display_name: None,
            source_group: None,
            min_temp: pair.min_temp,
            max_temp: pair.max_temp,
            current_value: None,
            in_range: None,
        }
    }

    /// Full refresh after an evaluation with a present value.
    pub fn refresh(&mut self, value: f64, pair: ThresholdPair, info: SourceInfo) {
        self.update_metadata(pair, info);
        self.current_value = Some(value);
        self.in_range = Some(pair.contains(value));
    }

    /// Refresh display metadata and thresholds only.
    ///
    /// The reading fields are kept unless a fresh value is supplied. `in_range`
    /// was computed against the old bounds, so it is cleared when they move.
    pub fn update_metadata(&mut self, pair: ThresholdPair, info: SourceInfo) {
        if self.min_temp != pair.min_temp || self.max_temp != pair.max_temp {
            self.in_range = None;
        }
        self.source_display_name = info.display_name;
        self.source_group = info.group;
        self.min_temp = pair.min_temp;
        self.max_temp = pair.max_temp;
    }
}

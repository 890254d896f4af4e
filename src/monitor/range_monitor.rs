//! In-range / out-of-range state machine for one watched value.
//!
//! Transitions are edge-triggered: a value that stays out of range across
//! repeated evaluations produces a single [`NotificationEvent`].

use super::event::{NotificationEvent, OutOfRangeReason, RangeDetails};
use super::thresholds::{ThresholdKey, ThresholdPair, ThresholdStore};
use crate::error::Result;
use log::{debug, info};

/// Tracks the range state of one watched value against its thresholds.
#[derive(Debug, Clone)]
pub struct RangeMonitor {
    monitor_id: String,
    source_id: String,
    thresholds: ThresholdStore,
    out_of_range: bool,
    /// Last observation, `None` while the source is unavailable.
    last_value: Option<f64>,
}

impl RangeMonitor {
    pub fn new(
        monitor_id: impl Into<String>,
        source_id: impl Into<String>,
        thresholds: ThresholdStore,
    ) -> Self {
        Self {
            monitor_id: monitor_id.into(),
            source_id: source_id.into(),
            thresholds,
            out_of_range: false,
            last_value: None,
        }
    }

    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn thresholds(&self) -> ThresholdPair {
        self.thresholds.pair()
    }

    pub fn store(&self) -> &ThresholdStore {
        &self.thresholds
    }

    pub fn is_out_of_range(&self) -> bool {
        self.out_of_range
    }

    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    /// Classify `value` and report a transition, if any.
    ///
    /// An absent value leaves the range state untouched. With
    /// `suppress_notification` the state is still updated but nothing is
    /// returned.
    pub fn evaluate(
        &mut self,
        value: Option<f64>,
        suppress_notification: bool,
    ) -> Option<NotificationEvent> {
        self.last_value = value;
        let Some(value) = value else {
            debug!("[Monitor] {}: no numeric value, skipping", self.monitor_id);
            return None;
        };

        let pair = self.thresholds.pair();
        let in_range = pair.contains(value);
        let was_out_of_range = self.out_of_range;
        self.out_of_range = !in_range;

        if suppress_notification {
            debug!(
                "[Monitor] {}: initial sync at {} (out_of_range={})",
                self.monitor_id, value, self.out_of_range
            );
            return None;
        }

        if !was_out_of_range && self.out_of_range {
            let reason = if value < pair.min_temp {
                OutOfRangeReason::BelowMin
            } else {
                OutOfRangeReason::AboveMax
            };
            info!(
                "[Monitor] {}: {} out of range [{}, {}] ({})",
                self.monitor_id, value, pair.min_temp, pair.max_temp, reason
            );
            Some(NotificationEvent::OutOfRange {
                details: self.details(value, pair),
                reason,
            })
        } else if was_out_of_range && in_range {
            info!(
                "[Monitor] {}: {} back in range [{}, {}]",
                self.monitor_id, value, pair.min_temp, pair.max_temp
            );
            Some(NotificationEvent::BackInRange {
                details: self.details(value, pair),
            })
        } else {
            None
        }
    }

    /// Re-evaluate the last observation after a threshold edit.
    pub fn on_thresholds_changed(&mut self) -> Option<NotificationEvent> {
        self.evaluate(self.last_value, false)
    }

    /// Store one threshold and re-evaluate against it.
    ///
    /// A rejected value leaves both the thresholds and the range state as
    /// they were.
    pub fn set_threshold(
        &mut self,
        key: ThresholdKey,
        value: f64,
    ) -> Result<Option<NotificationEvent>> {
        self.thresholds.set(key, value)?;
        Ok(self.on_thresholds_changed())
    }

    /// Replace both thresholds and re-evaluate.
    pub fn replace_thresholds(&mut self, pair: ThresholdPair) -> Result<Option<NotificationEvent>> {
        self.thresholds.replace(pair)?;
        Ok(self.on_thresholds_changed())
    }

    fn details(&self, value: f64, pair: ThresholdPair) -> RangeDetails {
        RangeDetails {
            monitor_id: self.monitor_id.clone(),
            source_id: self.source_id.clone(),
            current_value: value,
            min_temp: pair.min_temp,
            max_temp: pair.max_temp,
        }
    }
}

//! User-adjustable threshold controls.
//!
//! Each unit with controls enabled exposes a min and a max control. A
//! control edit goes straight to the unit, which re-evaluates its last
//! reading.

use super::bus::BusMessage;
use super::unit::UnitHandle;
use crate::error::{MonitorError, Result};
use crate::monitor::ThresholdKey;
use log::warn;

/// Lowest value a control accepts (°C).
pub const CONTROL_MIN_VALUE: f64 = -50.0;

/// Highest value a control accepts (°C).
pub const CONTROL_MAX_VALUE: f64 = 80.0;

/// Control step (°C).
pub const CONTROL_STEP: f64 = 0.5;

pub const UNIT_OF_MEASUREMENT: &str = "°C";

/// Numeric control bound to one side of a unit's threshold pair.
#[derive(Clone)]
pub struct ThresholdControl {
    key: ThresholdKey,
    unit: UnitHandle,
}

impl ThresholdControl {
    pub fn new(unit: UnitHandle, key: ThresholdKey) -> Self {
        Self { key, unit }
    }

    pub fn key(&self) -> ThresholdKey {
        self.key
    }

    pub fn name(&self) -> String {
        let suffix = match self.key {
            ThresholdKey::Min => "Min Temp",
            ThresholdKey::Max => "Max Temp",
        };
        format!("{} {}", self.unit.name(), suffix)
    }

    pub fn unique_id(&self) -> String {
        format!("heatmonitor_{}_{}", self.unit.monitor_id(), self.key)
    }

    pub fn native_value(&self) -> f64 {
        self.unit.thresholds().get(self.key)
    }

    /// Validate and apply a new value.
    ///
    /// Returns the notification fired if the edit moved the last reading
    /// across a bound.
    pub fn set_native_value(&self, value: f64) -> Result<Option<BusMessage>> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidThreshold {
                key: self.key.to_string(),
                value,
            });
        }
        if !(CONTROL_MIN_VALUE..=CONTROL_MAX_VALUE).contains(&value) {
            warn!(
                "[Control] {}: {} rejected, outside [{}, {}]",
                self.unique_id(),
                value,
                CONTROL_MIN_VALUE,
                CONTROL_MAX_VALUE
            );
            return Err(MonitorError::OutOfBounds {
                key: self.key.to_string(),
                value,
                min: CONTROL_MIN_VALUE,
                max: CONTROL_MAX_VALUE,
            });
        }
        self.unit.set_threshold(self.key, value).inspect_err(|e| {
            warn!("[Control] {}: {}", self.unique_id(), e);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::host::bus::EventBus;
    use crate::host::unit::MonitoredUnit;
    use crate::monitor::EVENT_OUT_OF_RANGE;

    fn unit() -> UnitHandle {
        let config = MonitorConfig::new("sensor.cellar").with_name("Cellar");
        let unit = MonitoredUnit::new(&config, None).unwrap();
        UnitHandle::new(unit, EventBus::new())
    }

    #[test]
    fn test_control_identity() {
        let unit = unit();
        let min = ThresholdControl::new(unit.clone(), ThresholdKey::Min);
        let max = ThresholdControl::new(unit, ThresholdKey::Max);
        assert_eq!(min.name(), "Cellar Min Temp");
        assert_eq!(max.unique_id(), "heatmonitor_cellar_max_temp");
        assert_eq!(min.native_value(), 5.0);
        assert_eq!(max.native_value(), 30.0);
    }

    #[test]
    fn test_set_native_value_reevaluates() {
        let unit = unit();
        unit.start(Some("20"));
        let max = ThresholdControl::new(unit.clone(), ThresholdKey::Max);

        let message = max.set_native_value(15.0).unwrap().unwrap();
        assert_eq!(message.event_type, EVENT_OUT_OF_RANGE);
        assert_eq!(message.str_field("reason"), Some("above_max"));
        assert_eq!(max.native_value(), 15.0);
        assert!(unit.is_on());
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let unit = unit();
        let min = ThresholdControl::new(unit, ThresholdKey::Min);
        assert!(matches!(
            min.set_native_value(-50.5),
            Err(MonitorError::OutOfBounds { .. })
        ));
        assert!(matches!(
            min.set_native_value(f64::NAN),
            Err(MonitorError::InvalidThreshold { .. })
        ));
        assert_eq!(min.native_value(), 5.0);

        assert!(min.set_native_value(-50.0).is_ok());
    }
}

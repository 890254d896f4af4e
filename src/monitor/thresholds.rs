//! Threshold pair and its mutable store.
//!
//! Each monitored unit owns exactly one [`ThresholdStore`]. The store only
//! validates and holds values; re-evaluation after an edit is driven by the
//! owning [`RangeMonitor`](super::RangeMonitor).

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Default lower threshold in °C.
pub const DEFAULT_MIN_TEMP: f64 = 5.0;

/// Default upper threshold in °C.
pub const DEFAULT_MAX_TEMP: f64 = 30.0;

/// Selects one side of a [`ThresholdPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter, EnumString)]
pub enum ThresholdKey {
    #[strum(serialize = "min_temp")]
    Min,
    #[strum(serialize = "max_temp")]
    Max,
}

/// How a store treats a pair whose minimum exceeds its maximum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangePolicy {
    /// Refuse any pair with `min_temp > max_temp`.
    #[default]
    RejectInverted,
    /// Accept inverted pairs; every value then reads as out of range.
    AllowInverted,
}

/// Inclusive `[min_temp, max_temp]` interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub min_temp: f64,
    pub max_temp: f64,
}

impl ThresholdPair {
    pub fn new(min_temp: f64, max_temp: f64) -> Self {
        Self { min_temp, max_temp }
    }

    /// Both bounds count as in range.
    pub fn contains(&self, value: f64) -> bool {
        self.min_temp <= value && value <= self.max_temp
    }

    pub fn get(&self, key: ThresholdKey) -> f64 {
        match key {
            ThresholdKey::Min => self.min_temp,
            ThresholdKey::Max => self.max_temp,
        }
    }

    fn with(mut self, key: ThresholdKey, value: f64) -> Self {
        match key {
            ThresholdKey::Min => self.min_temp = value,
            ThresholdKey::Max => self.max_temp = value,
        }
        self
    }

    fn is_inverted(&self) -> bool {
        self.min_temp > self.max_temp
    }
}

impl Default for ThresholdPair {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_TEMP, DEFAULT_MAX_TEMP)
    }
}

/// Holds the mutable threshold pair of one monitored unit.
#[derive(Debug, Clone)]
pub struct ThresholdStore {
    pair: ThresholdPair,
    policy: RangePolicy,
}

impl ThresholdStore {
    /// Create a store, validating the initial pair against `policy`.
    pub fn new(pair: ThresholdPair, policy: RangePolicy) -> Result<Self> {
        validate_pair(pair, policy)?;
        Ok(Self { pair, policy })
    }

    pub fn get(&self, key: ThresholdKey) -> f64 {
        self.pair.get(key)
    }

    pub fn pair(&self) -> ThresholdPair {
        self.pair
    }

    pub fn policy(&self) -> RangePolicy {
        self.policy
    }

    /// Store one side of the pair.
    ///
    /// On error the previous pair is left untouched.
    pub fn set(&mut self, key: ThresholdKey, value: f64) -> Result<ThresholdPair> {
        if !value.is_finite() {
            return Err(MonitorError::InvalidThreshold {
                key: key.to_string(),
                value,
            });
        }
        let candidate = self.pair.with(key, value);
        validate_pair(candidate, self.policy)?;
        self.pair = candidate;
        Ok(candidate)
    }

    /// Replace both sides at once, as a stored-configuration update does.
    pub fn replace(&mut self, pair: ThresholdPair) -> Result<ThresholdPair> {
        validate_pair(pair, self.policy)?;
        self.pair = pair;
        Ok(pair)
    }
}

fn validate_pair(pair: ThresholdPair, policy: RangePolicy) -> Result<()> {
    for (key, value) in [
        (ThresholdKey::Min, pair.min_temp),
        (ThresholdKey::Max, pair.max_temp),
    ] {
        if !value.is_finite() {
            return Err(MonitorError::InvalidThreshold {
                key: key.to_string(),
                value,
            });
        }
    }
    if policy == RangePolicy::RejectInverted && pair.is_inverted() {
        return Err(MonitorError::InvertedRange {
            min_temp: pair.min_temp,
            max_temp: pair.max_temp,
        });
    }
    Ok(())
}

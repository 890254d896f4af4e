//! Unit setup and unload.
//!
//! The hub plays the host's part for standalone use: it tracks the latest
//! raw state of every source, creates one unit per configured source, wires
//! its subscriptions and controls, and tears everything down on unload.

use super::bus::{BusMessage, EVENT_ENTITY_REGISTRY_UPDATED, EVENT_STATE_CHANGED, EventBus};
use super::control::ThresholdControl;
use super::metadata::SourceMetadata;
use super::unit::{Attachment, MonitoredUnit, UnitHandle};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::monitor::ThresholdKey;
use log::info;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use strum::IntoEnumIterator;

struct RegisteredUnit {
    handle: UnitHandle,
    attachment: Attachment,
    controls: Vec<ThresholdControl>,
}

pub struct Hub {
    bus: Arc<EventBus>,
    metadata: Option<Arc<dyn SourceMetadata>>,
    /// Last raw state per source; `None` when unavailable.
    states: RwLock<HashMap<String, Option<String>>>,
    units: Vec<RegisteredUnit>,
}

impl Hub {
    pub fn new(bus: Arc<EventBus>, metadata: Option<Arc<dyn SourceMetadata>>) -> Self {
        Self {
            bus,
            metadata,
            states: RwLock::new(HashMap::new()),
            units: Vec::new(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Create, attach and start a unit for `config`.
    pub fn setup(&mut self, config: &MonitorConfig) -> Result<UnitHandle> {
        self.check_available(config, None)?;
        let monitor_id = config.monitor_id();

        let unit = MonitoredUnit::new(config, self.metadata.clone())?;
        let handle = UnitHandle::new(unit, self.bus.clone());
        let initial = self.state(&config.source_id);
        let attachment = Attachment::attach(&handle, initial.as_deref());

        let controls = if config.threshold_controls {
            ThresholdKey::iter()
                .map(|key| ThresholdControl::new(handle.clone(), key))
                .collect()
        } else {
            Vec::new()
        };

        info!(
            "[Hub] Set up {} watching {} with {} control(s)",
            monitor_id,
            config.source_id,
            controls.len()
        );
        self.units.push(RegisteredUnit {
            handle: handle.clone(),
            attachment,
            controls,
        });
        Ok(handle)
    }

    /// Set up every entry, stopping at the first error.
    pub fn setup_all(&mut self, configs: &[MonitorConfig]) -> Result<()> {
        for config in configs {
            self.setup(config)?;
        }
        Ok(())
    }

    /// Tear down and forget a unit.
    pub fn unload(&mut self, monitor_id: &str) -> Result<()> {
        let index = self
            .position(monitor_id)
            .ok_or_else(|| MonitorError::UnknownMonitor(monitor_id.to_string()))?;
        let mut registered = self.units.remove(index);
        registered.attachment.teardown();
        info!("[Hub] Unloaded {}", monitor_id);
        Ok(())
    }

    /// Apply an updated configuration to an existing unit.
    ///
    /// A changed source replaces the unit; otherwise thresholds and name are
    /// updated in place and the last reading re-evaluated.
    pub fn reconfigure(
        &mut self,
        monitor_id: &str,
        config: &MonitorConfig,
    ) -> Result<Option<BusMessage>> {
        let handle = self
            .unit(monitor_id)
            .cloned()
            .ok_or_else(|| MonitorError::UnknownMonitor(monitor_id.to_string()))?;

        let same_identity = handle.source_id() == config.source_id
            && config.monitor_id() == monitor_id
            && handle.with_unit(|u| u.has_threshold_controls()) == config.threshold_controls;
        if same_identity {
            return handle.apply_config(config);
        }

        config.validate()?;
        self.check_available(config, Some(monitor_id))?;
        self.unload(monitor_id)?;
        self.setup(config)?;
        Ok(None)
    }

    /// Unload every unit.
    pub fn shutdown(&mut self) {
        for mut registered in self.units.drain(..) {
            registered.attachment.teardown();
        }
        info!("[Hub] All units unloaded");
    }

    pub fn unit(&self, monitor_id: &str) -> Option<&UnitHandle> {
        self.position(monitor_id).map(|i| &self.units[i].handle)
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitHandle> {
        self.units.iter().map(|u| &u.handle)
    }

    pub fn control(&self, monitor_id: &str, key: ThresholdKey) -> Option<&ThresholdControl> {
        let index = self.position(monitor_id)?;
        self.units[index].controls.iter().find(|c| c.key() == key)
    }

    /// Record a new raw state for `source_id` and announce it.
    pub fn post_state(&self, source_id: &str, raw: Option<&str>) {
        self.states
            .write()
            .insert(source_id.to_string(), raw.map(str::to_string));
        self.bus.fire(
            EVENT_STATE_CHANGED,
            json!({ "entity_id": source_id, "new_state": raw }),
        );
    }

    /// Announce a registry change for `source_id`.
    pub fn post_registry_update(&self, action: &str, source_id: &str) {
        self.bus.fire(
            EVENT_ENTITY_REGISTRY_UPDATED,
            json!({ "action": action, "entity_id": source_id }),
        );
    }

    /// Last raw state recorded for `source_id`.
    pub fn state(&self, source_id: &str) -> Option<String> {
        self.states.read().get(source_id).cloned().flatten()
    }

    /// Reject a config whose source or id belongs to another unit.
    /// `replacing` names the unit the config is about to replace.
    fn check_available(&self, config: &MonitorConfig, replacing: Option<&str>) -> Result<()> {
        let monitor_id = config.monitor_id();
        for registered in &self.units {
            let other_id = registered.handle.monitor_id();
            if Some(other_id.as_str()) == replacing {
                continue;
            }
            if registered.handle.source_id() == config.source_id {
                return Err(MonitorError::DuplicateSource(config.source_id.clone()));
            }
            if other_id == monitor_id {
                return Err(MonitorError::InvalidConfig(format!(
                    "duplicate monitor id: {monitor_id}"
                )));
            }
        }
        Ok(())
    }

    fn position(&self, monitor_id: &str) -> Option<usize> {
        self.units
            .iter()
            .position(|u| u.handle.monitor_id() == monitor_id)
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

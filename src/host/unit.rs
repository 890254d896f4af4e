//! Monitored unit: one watched source, one threshold pair.
//!
//! [`MonitoredUnit`] combines the range monitor with the attribute snapshot
//! and optional metadata lookup. It never touches the bus itself;
//! [`UnitHandle`] serializes access to a unit and fires its notifications
//! after the unit lock is released.

use super::bus::{
    BusMessage, EVENT_ENTITY_REGISTRY_UPDATED, EVENT_STATE_CHANGED, EventBus, Subscription,
};
use super::metadata::SourceMetadata;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::monitor::{
    AttributeSnapshot, NotificationEvent, RangeMonitor, SourceInfo, ThresholdKey, ThresholdPair,
    parse_reading,
};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

pub struct MonitoredUnit {
    name: String,
    monitor: RangeMonitor,
    snapshot: AttributeSnapshot,
    /// Present only when metadata lookup is enabled for this unit.
    metadata: Option<Arc<dyn SourceMetadata>>,
    threshold_controls: bool,
    started: bool,
}

impl MonitoredUnit {
    pub fn new(config: &MonitorConfig, metadata: Option<Arc<dyn SourceMetadata>>) -> Result<Self> {
        config.validate()?;
        let monitor = RangeMonitor::new(
            config.monitor_id(),
            config.source_id.clone(),
            config.threshold_store()?,
        );
        let snapshot = AttributeSnapshot::new(config.source_id.clone(), monitor.thresholds());
        Ok(Self {
            name: config.display_name(),
            monitor,
            snapshot,
            metadata: metadata.filter(|_| config.lookup_metadata),
            threshold_controls: config.threshold_controls,
            started: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn monitor_id(&self) -> &str {
        self.monitor.monitor_id()
    }

    pub fn source_id(&self) -> &str {
        self.monitor.source_id()
    }

    pub fn unique_id(&self) -> String {
        format!("heatmonitor_{}_alert", self.monitor_id())
    }

    /// Problem flag: `true` while the value is out of range.
    pub fn is_on(&self) -> bool {
        self.monitor.is_out_of_range()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn has_threshold_controls(&self) -> bool {
        self.threshold_controls
    }

    pub fn thresholds(&self) -> ThresholdPair {
        self.monitor.thresholds()
    }

    pub fn snapshot(&self) -> &AttributeSnapshot {
        &self.snapshot
    }

    pub fn monitor(&self) -> &RangeMonitor {
        &self.monitor
    }

    /// Initial sync: classify the current state without notifying.
    pub fn start(&mut self, initial_raw: Option<&str>) {
        let value = parse_reading(initial_raw);
        self.monitor.evaluate(value, true);
        self.refresh_snapshot();
        self.started = true;
        info!(
            "[Monitor] {} started on {} (out_of_range={})",
            self.monitor_id(),
            self.source_id(),
            self.is_on()
        );
    }

    /// Handle a new raw state from the watched source.
    pub fn handle_value_changed(&mut self, raw: Option<&str>) -> Option<NotificationEvent> {
        let value = parse_reading(raw);
        if value.is_none() {
            debug!(
                "[Monitor] {}: ignoring non-numeric state {:?}",
                self.monitor_id(),
                raw
            );
        }
        let event = self.monitor.evaluate(value, false);
        self.refresh_snapshot();
        event
    }

    /// Store one threshold and re-evaluate the last reading.
    pub fn set_threshold(
        &mut self,
        key: ThresholdKey,
        value: f64,
    ) -> Result<Option<NotificationEvent>> {
        let event = self.monitor.set_threshold(key, value)?;
        info!("[Monitor] {}: {} set to {}", self.monitor_id(), key, value);
        self.refresh_after_threshold_change();
        Ok(event)
    }

    /// Apply an updated configuration for the same source.
    pub fn apply_config(&mut self, config: &MonitorConfig) -> Result<Option<NotificationEvent>> {
        if config.source_id != self.source_id() {
            return Err(MonitorError::InvalidConfig(format!(
                "source change from {} to {} requires a new unit",
                self.source_id(),
                config.source_id
            )));
        }
        config.validate()?;
        let event = self.monitor.replace_thresholds(config.thresholds())?;
        self.name = config.display_name();
        self.threshold_controls = config.threshold_controls;
        info!(
            "[Monitor] {}: configuration updated to [{}, {}]",
            self.monitor_id(),
            config.min_temp,
            config.max_temp
        );
        self.refresh_after_threshold_change();
        Ok(event)
    }

    /// Refresh display metadata without touching the range state.
    pub fn refresh_metadata(&mut self) {
        let info = self.source_info();
        let pair = self.thresholds();
        match self.monitor.last_value() {
            Some(value) => self.snapshot.refresh(value, pair, info),
            None => self.snapshot.update_metadata(pair, info),
        }
    }

    fn refresh_after_threshold_change(&mut self) {
        if self.monitor.last_value().is_some() {
            self.refresh_snapshot();
        } else {
            let info = self.source_info();
            self.snapshot.update_metadata(self.thresholds(), info);
        }
    }

    /// Rebuild the snapshot from the last reading; a no-op without one.
    fn refresh_snapshot(&mut self) {
        if let Some(value) = self.monitor.last_value() {
            let info = self.source_info();
            self.snapshot.refresh(value, self.thresholds(), info);
        }
    }

    fn source_info(&self) -> SourceInfo {
        self.metadata
            .as_ref()
            .map(|m| m.lookup(self.source_id()))
            .unwrap_or_default()
    }
}

/// Shared, bus-connected handle to a [`MonitoredUnit`].
#[derive(Clone)]
pub struct UnitHandle {
    unit: Arc<Mutex<MonitoredUnit>>,
    bus: Arc<EventBus>,
}

impl UnitHandle {
    pub fn new(unit: MonitoredUnit, bus: Arc<EventBus>) -> Self {
        Self {
            unit: Arc::new(Mutex::new(unit)),
            bus,
        }
    }

    pub fn monitor_id(&self) -> String {
        self.unit.lock().monitor_id().to_string()
    }

    pub fn source_id(&self) -> String {
        self.unit.lock().source_id().to_string()
    }

    pub fn name(&self) -> String {
        self.unit.lock().name().to_string()
    }

    pub fn is_on(&self) -> bool {
        self.unit.lock().is_on()
    }

    pub fn thresholds(&self) -> ThresholdPair {
        self.unit.lock().thresholds()
    }

    pub fn snapshot(&self) -> AttributeSnapshot {
        self.unit.lock().snapshot().clone()
    }

    /// Run `f` with the unit locked.
    pub fn with_unit<R>(&self, f: impl FnOnce(&MonitoredUnit) -> R) -> R {
        f(&self.unit.lock())
    }

    pub fn start(&self, initial_raw: Option<&str>) {
        self.unit.lock().start(initial_raw);
    }

    pub fn value_changed(&self, raw: Option<&str>) -> Option<BusMessage> {
        let event = self.unit.lock().handle_value_changed(raw);
        event.map(|e| self.publish(&e))
    }

    pub fn set_threshold(&self, key: ThresholdKey, value: f64) -> Result<Option<BusMessage>> {
        let event = self.unit.lock().set_threshold(key, value)?;
        Ok(event.map(|e| self.publish(&e)))
    }

    pub fn apply_config(&self, config: &MonitorConfig) -> Result<Option<BusMessage>> {
        let event = self.unit.lock().apply_config(config)?;
        Ok(event.map(|e| self.publish(&e)))
    }

    pub fn refresh_metadata(&self) {
        self.unit.lock().refresh_metadata();
    }

    fn publish(&self, event: &NotificationEvent) -> BusMessage {
        self.bus.fire(event.event_type(), event.payload())
    }

    fn downgrade(&self) -> WeakUnitHandle {
        WeakUnitHandle {
            unit: Arc::downgrade(&self.unit),
            bus: Arc::downgrade(&self.bus),
        }
    }
}

/// Non-owning handle held by bus listeners.
#[derive(Clone)]
struct WeakUnitHandle {
    unit: Weak<Mutex<MonitoredUnit>>,
    bus: Weak<EventBus>,
}

impl WeakUnitHandle {
    fn upgrade(&self) -> Option<UnitHandle> {
        Some(UnitHandle {
            unit: self.unit.upgrade()?,
            bus: self.bus.upgrade()?,
        })
    }
}

/// Bus subscriptions of one started unit.
///
/// [`teardown`](Self::teardown) releases every subscription exactly once and
/// may be called any number of times; dropping the attachment tears it down.
pub struct Attachment {
    monitor_id: String,
    subscriptions: Vec<Subscription>,
}

impl Attachment {
    /// Subscribe `handle` to its source and registry updates, then run the
    /// initial suppressed evaluation.
    pub fn attach(handle: &UnitHandle, initial_raw: Option<&str>) -> Self {
        let source_id = handle.source_id();
        let monitor_id = handle.monitor_id();

        let weak = handle.downgrade();
        let watched = source_id.clone();
        let state_sub = handle.bus.listen(EVENT_STATE_CHANGED, move |msg| {
            if msg.str_field("entity_id") != Some(watched.as_str()) {
                return;
            }
            if let Some(handle) = weak.upgrade() {
                handle.value_changed(msg.str_field("new_state"));
            }
        });

        let weak = handle.downgrade();
        let watched = source_id;
        let registry_sub = handle.bus.listen(EVENT_ENTITY_REGISTRY_UPDATED, move |msg| {
            let relevant = matches!(msg.str_field("action"), Some("create" | "update"))
                && msg.str_field("entity_id") == Some(watched.as_str());
            if relevant && let Some(handle) = weak.upgrade() {
                handle.refresh_metadata();
            }
        });

        handle.start(initial_raw);

        Self {
            monitor_id,
            subscriptions: vec![state_sub, registry_sub],
        }
    }

    pub fn is_attached(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }

    /// Release all subscriptions. Returns how many were released by this call.
    pub fn teardown(&mut self) -> usize {
        let released = self
            .subscriptions
            .iter()
            .filter(|s| s.unsubscribe())
            .count();
        if released > 0 {
            debug!(
                "[Monitor] {}: released {} subscription(s)",
                self.monitor_id, released
            );
        }
        released
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::metadata::MetadataRegistry;
    use crate::monitor::{EVENT_BACK_IN_RANGE, EVENT_OUT_OF_RANGE};
    use serde_json::json;

    fn config() -> MonitorConfig {
        MonitorConfig::new("sensor.greenhouse").with_name("Greenhouse")
    }

    fn registry() -> Arc<MetadataRegistry> {
        let registry = Arc::new(MetadataRegistry::new());
        registry.set_name("sensor.greenhouse", Some("Greenhouse probe".to_string()));
        registry.set_area("sensor.greenhouse", Some("Garden".to_string()));
        registry
    }

    #[test]
    fn test_unit_identity() {
        let unit = MonitoredUnit::new(&config(), None).unwrap();
        assert_eq!(unit.name(), "Greenhouse");
        assert_eq!(unit.monitor_id(), "greenhouse");
        assert_eq!(unit.unique_id(), "heatmonitor_greenhouse_alert");
        assert!(!unit.is_on());
        assert!(!unit.is_started());
    }

    #[test]
    fn test_start_is_silent_and_syncs_state() {
        let mut unit = MonitoredUnit::new(&config(), None).unwrap();
        unit.start(Some("40.0"));
        assert!(unit.is_started());
        assert!(unit.is_on());
        assert_eq!(unit.snapshot().current_value, Some(40.0));
        assert_eq!(unit.snapshot().in_range, Some(false));
    }

    #[test]
    fn test_non_numeric_state_leaves_snapshot() {
        let mut unit = MonitoredUnit::new(&config(), None).unwrap();
        unit.start(Some("21.0"));
        assert_eq!(unit.handle_value_changed(Some("unavailable")), None);
        assert_eq!(unit.snapshot().current_value, Some(21.0));
        assert!(!unit.is_on());
    }

    #[test]
    fn test_metadata_only_when_enabled() {
        let registry = registry();
        let mut unit = MonitoredUnit::new(&config(), Some(registry.clone())).unwrap();
        unit.start(Some("20"));
        assert_eq!(
            unit.snapshot().source_display_name.as_deref(),
            Some("Greenhouse probe")
        );
        assert_eq!(unit.snapshot().source_group.as_deref(), Some("Garden"));

        let mut plain = config();
        plain.lookup_metadata = false;
        let mut unit = MonitoredUnit::new(&plain, Some(registry)).unwrap();
        unit.start(Some("20"));
        assert_eq!(unit.snapshot().source_display_name, None);
    }

    #[test]
    fn test_refresh_metadata_keeps_range_state() {
        let registry = registry();
        let mut unit = MonitoredUnit::new(&config(), Some(registry.clone())).unwrap();
        unit.start(Some("35"));
        registry.set_area("sensor.greenhouse", Some("Orchard".to_string()));
        unit.refresh_metadata();
        assert_eq!(unit.snapshot().source_group.as_deref(), Some("Orchard"));
        assert!(unit.is_on());
    }

    #[test]
    fn test_threshold_change_without_reading_updates_snapshot_bounds() {
        let mut unit = MonitoredUnit::new(&config(), None).unwrap();
        unit.start(None);
        assert_eq!(unit.set_threshold(ThresholdKey::Max, 25.0).unwrap(), None);
        assert_eq!(unit.snapshot().max_temp, 25.0);
        assert_eq!(unit.snapshot().current_value, None);
    }

    #[test]
    fn test_threshold_change_after_outage_clears_stale_in_range() {
        let mut unit = MonitoredUnit::new(&config(), None).unwrap();
        unit.start(Some("21.0"));
        assert_eq!(unit.snapshot().in_range, Some(true));
        unit.handle_value_changed(None);

        assert_eq!(unit.set_threshold(ThresholdKey::Max, 15.0).unwrap(), None);
        let snapshot = unit.snapshot();
        assert_eq!(snapshot.max_temp, 15.0);
        assert_eq!(snapshot.current_value, Some(21.0));
        assert_eq!(snapshot.in_range, None);
        assert!(!unit.is_on());
    }

    #[test]
    fn test_apply_config_rejects_source_change() {
        let mut unit = MonitoredUnit::new(&config(), None).unwrap();
        let moved = MonitorConfig::new("sensor.shed");
        assert!(matches!(
            unit.apply_config(&moved),
            Err(MonitorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_apply_config_reevaluates() {
        let mut unit = MonitoredUnit::new(&config(), None).unwrap();
        unit.start(Some("20"));
        let updated = config().with_name("Glasshouse").with_thresholds(22.0, 30.0);
        let event = unit.apply_config(&updated).unwrap().unwrap();
        assert_eq!(event.event_type(), EVENT_OUT_OF_RANGE);
        assert_eq!(unit.name(), "Glasshouse");
        assert_eq!(unit.snapshot().min_temp, 22.0);
    }

    #[test]
    fn test_attachment_routes_bus_events() {
        let bus = EventBus::new();
        let unit = MonitoredUnit::new(&config(), None).unwrap();
        let handle = UnitHandle::new(unit, bus.clone());
        let mut attachment = Attachment::attach(&handle, Some("20"));

        let fired = Arc::new(Mutex::new(Vec::new()));
        let fired_clone = fired.clone();
        let _out = bus.listen(EVENT_OUT_OF_RANGE, move |msg| {
            fired_clone.lock().push(msg.event_type.clone());
        });
        let fired_clone = fired.clone();
        let _back = bus.listen(EVENT_BACK_IN_RANGE, move |msg| {
            fired_clone.lock().push(msg.event_type.clone());
        });

        bus.fire(
            EVENT_STATE_CHANGED,
            json!({"entity_id": "sensor.other", "new_state": "99"}),
        );
        bus.fire(
            EVENT_STATE_CHANGED,
            json!({"entity_id": "sensor.greenhouse", "new_state": "31"}),
        );
        bus.fire(
            EVENT_STATE_CHANGED,
            json!({"entity_id": "sensor.greenhouse", "new_state": "29.5"}),
        );
        assert_eq!(
            *fired.lock(),
            vec![EVENT_OUT_OF_RANGE.to_string(), EVENT_BACK_IN_RANGE.to_string()]
        );

        assert_eq!(attachment.teardown(), 2);
        assert_eq!(attachment.teardown(), 0);
        assert!(!attachment.is_attached());

        bus.fire(
            EVENT_STATE_CHANGED,
            json!({"entity_id": "sensor.greenhouse", "new_state": "50"}),
        );
        assert_eq!(fired.lock().len(), 2);
        assert!(!handle.is_on());
    }

    #[test]
    fn test_null_state_is_absent() {
        let bus = EventBus::new();
        let unit = MonitoredUnit::new(&config(), None).unwrap();
        let handle = UnitHandle::new(unit, bus.clone());
        let _attachment = Attachment::attach(&handle, Some("31"));

        bus.fire(
            EVENT_STATE_CHANGED,
            json!({"entity_id": "sensor.greenhouse", "new_state": null}),
        );
        assert!(handle.is_on());
        assert_eq!(handle.snapshot().current_value, Some(31.0));
    }
}

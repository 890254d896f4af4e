//! MQTT integration for monitored units.
//!
//! Feeds source readings into the hub, publishes transition events and
//! attribute snapshots, and accepts threshold commands. MQTT internals stay
//! out of main.rs.

use super::client::{MqttClient, MqttHandle, MqttMessage};
use super::reading::{SourceUpdate, parse_availability, parse_state_payload};
use crate::config::{Config, MqttConfig};
use crate::host::{BusMessage, Hub, UnitHandle};
use crate::monitor::{AttributeSnapshot, EVENT_BACK_IN_RANGE, EVENT_OUT_OF_RANGE, ThresholdKey};
use log::{info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Watched source topic and the field holding its reading.
#[derive(Debug, Clone)]
struct SourceBinding {
    topic: String,
    value_key: String,
}

impl SourceBinding {
    fn availability_topic(&self) -> String {
        format!("{}/availability", self.topic)
    }
}

/// Retained state published per unit.
#[derive(Serialize)]
struct UnitState<'a> {
    name: &'a str,
    problem: bool,
    attributes: &'a AttributeSnapshot,
}

/// Topics under the configured prefix.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn event(&self, monitor_id: &str) -> String {
        format!("{}/{}/event", self.prefix, monitor_id)
    }

    pub fn attributes(&self, monitor_id: &str) -> String {
        format!("{}/{}/attributes", self.prefix, monitor_id)
    }

    pub fn command(&self, monitor_id: &str, key: ThresholdKey) -> String {
        format!("{}/{}/{}/set", self.prefix, monitor_id, key)
    }

    /// Wildcard subscriptions for threshold commands.
    pub fn command_filters(&self) -> Vec<String> {
        vec![
            format!("{}/+/{}/set", self.prefix, ThresholdKey::Min),
            format!("{}/+/{}/set", self.prefix, ThresholdKey::Max),
        ]
    }

    /// Split a command topic into monitor id and threshold key.
    pub fn parse_command(&self, topic: &str) -> Option<(String, ThresholdKey)> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let mut parts = rest.split('/');
        let monitor_id = parts.next()?;
        let key = ThresholdKey::from_str(parts.next()?).ok()?;
        if parts.next()? != "set" || parts.next().is_some() || monitor_id.is_empty() {
            return None;
        }
        Some((monitor_id.to_string(), key))
    }
}

/// MQTT Integration orchestrator.
pub struct MqttIntegration {
    config: MqttConfig,
    topics: Topics,
    hub: Arc<RwLock<Hub>>,
    sources: Vec<SourceBinding>,
}

impl MqttIntegration {
    pub fn new(config: &Config, hub: Arc<RwLock<Hub>>) -> Self {
        let sources = config
            .monitors
            .iter()
            .map(|m| SourceBinding {
                topic: m.source_id.clone(),
                value_key: m.value_key.clone(),
            })
            .collect();
        Self {
            config: config.mqtt.clone(),
            topics: Topics::new(config.topic_prefix.clone()),
            hub,
            sources,
        }
    }

    /// Start the MQTT integration.
    ///
    /// Spawns a background task that connects to the broker, subscribes to
    /// source and command topics, and routes messages to the hub.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(self) {
        if self.sources.is_empty() {
            info!("[MQTT] No monitors configured, skipping MQTT integration");
            return;
        }

        info!(
            "[MQTT] Connecting to {}:{}",
            self.config.broker_host, self.config.broker_port
        );

        let mqtt_client = MqttClient::new(&self.config);
        let client = mqtt_client.client();

        let (msg_tx, mut msg_rx) = mpsc::channel::<MqttMessage>(64);
        let (connected_tx, connected_rx) = oneshot::channel();

        let mqtt_loop = tokio::spawn(async move {
            mqtt_client.run(msg_tx, Some(connected_tx)).await;
        });

        match tokio::time::timeout(Duration::from_secs(10), connected_rx).await {
            Ok(Ok(())) => {
                info!("[MQTT] Connection established, subscribing to topics");
            }
            Ok(Err(_)) => {
                warn!("[MQTT] Connection signal channel dropped");
                return;
            }
            Err(_) => {
                warn!("[MQTT] Connection timeout after 10 seconds");
                mqtt_loop.abort();
                return;
            }
        }

        let mut topics: Vec<String> = Vec::new();
        for source in &self.sources {
            topics.push(source.topic.clone());
            topics.push(source.availability_topic());
        }
        topics.extend(self.topics.command_filters());
        for topic in &topics {
            if let Err(e) = client.subscribe(topic).await {
                warn!("[MQTT] Failed to subscribe to {}: {:?}", topic, e);
            }
        }

        // Bus listeners only queue; publishing happens on this task
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<BusMessage>();
        let _subscriptions: Vec<_> = {
            let hub = self.hub.read();
            [EVENT_OUT_OF_RANGE, EVENT_BACK_IN_RANGE]
                .into_iter()
                .map(|event_type| {
                    let tx = event_tx.clone();
                    hub.bus().listen(event_type, move |msg| {
                        let _ = tx.send(msg.clone());
                    })
                })
                .collect()
        };

        let handles: Vec<UnitHandle> = self.hub.read().units().cloned().collect();
        for handle in &handles {
            self.publish_state(&client, handle).await;
        }

        info!(
            "[MQTT] Integration started with {} monitor(s)",
            self.sources.len()
        );

        loop {
            tokio::select! {
                msg = msg_rx.recv() => {
                    let Some(msg) = msg else { break };
                    let touched = self.process_message(&msg);
                    for handle in &touched {
                        self.publish_state(&client, handle).await;
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.publish_event(&client, &event).await;
                }
            }
        }

        mqtt_loop.abort();
    }

    /// Route one incoming message. Returns the units whose state should be
    /// republished.
    fn process_message(&self, msg: &MqttMessage) -> Vec<UnitHandle> {
        if let Some((monitor_id, key)) = self.topics.parse_command(&msg.topic) {
            return self.process_command(&monitor_id, key, &msg.payload);
        }

        for source in &self.sources {
            let update = if msg.topic == source.topic {
                parse_state_payload(&msg.payload, &source.value_key)
            } else if msg.topic == source.availability_topic() {
                match parse_availability(&msg.payload) {
                    Some(false) => Some(SourceUpdate::Unavailable),
                    _ => None,
                }
            } else {
                continue;
            };

            let Some(update) = update else {
                return Vec::new();
            };
            let hub = self.hub.read();
            match update {
                SourceUpdate::State(raw) => hub.post_state(&source.topic, Some(&raw)),
                SourceUpdate::Unavailable => {
                    info!("[MQTT] {} is unavailable", source.topic);
                    hub.post_state(&source.topic, None);
                }
            }
            return hub
                .units()
                .filter(|u| u.source_id() == source.topic)
                .cloned()
                .collect();
        }

        Vec::new()
    }

    fn process_command(
        &self,
        monitor_id: &str,
        key: ThresholdKey,
        payload: &str,
    ) -> Vec<UnitHandle> {
        let hub = self.hub.read();
        let Some(control) = hub.control(monitor_id, key) else {
            warn!("[MQTT] No {} control for monitor {}", key, monitor_id);
            return Vec::new();
        };

        let value = match payload.trim().parse::<f64>() {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "[MQTT] Invalid {} for {}: {:?} ({})",
                    key, monitor_id, payload, e
                );
                return Vec::new();
            }
        };

        match control.set_native_value(value) {
            Ok(_) => hub.unit(monitor_id).cloned().into_iter().collect(),
            Err(e) => {
                warn!("[MQTT] Rejected {} for {}: {}", key, monitor_id, e);
                Vec::new()
            }
        }
    }

    async fn publish_event(&self, client: &MqttHandle, event: &BusMessage) {
        let Some(monitor_id) = event.str_field("monitor_id") else {
            return;
        };
        let topic = self.topics.event(monitor_id);
        match serde_json::to_string(event) {
            Ok(payload) => {
                if let Err(e) = client.publish(&topic, &payload, false).await {
                    warn!("[MQTT] Failed to publish event to {}: {:?}", topic, e);
                }
            }
            Err(e) => warn!("[MQTT] Failed to encode event: {}", e),
        }
    }

    async fn publish_state(&self, client: &MqttHandle, handle: &UnitHandle) {
        let (monitor_id, payload) = handle.with_unit(|unit| {
            let state = UnitState {
                name: unit.name(),
                problem: unit.is_on(),
                attributes: unit.snapshot(),
            };
            (unit.monitor_id().to_string(), serde_json::to_string(&state))
        });
        let topic = self.topics.attributes(&monitor_id);
        match payload {
            Ok(payload) => {
                if let Err(e) = client.publish(&topic, &payload, true).await {
                    warn!("[MQTT] Failed to publish state to {}: {:?}", topic, e);
                }
            }
            Err(e) => warn!("[MQTT] Failed to encode state: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::host::EventBus;

    fn integration() -> MqttIntegration {
        let mut config = Config::default();
        config.monitors = vec![MonitorConfig::new("zigbee2mqtt/Greenhouse").with_name("Greenhouse")];
        let mut hub = Hub::new(EventBus::new(), None);
        hub.setup_all(&config.monitors).unwrap();
        MqttIntegration::new(&config, Arc::new(RwLock::new(hub)))
    }

    fn message(topic: &str, payload: &str) -> MqttMessage {
        MqttMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_topics() {
        let topics = Topics::new("heat_monitor");
        assert_eq!(topics.event("cellar"), "heat_monitor/cellar/event");
        assert_eq!(
            topics.command("cellar", ThresholdKey::Max),
            "heat_monitor/cellar/max_temp/set"
        );
        assert_eq!(
            topics.command_filters(),
            vec![
                "heat_monitor/+/min_temp/set".to_string(),
                "heat_monitor/+/max_temp/set".to_string()
            ]
        );
    }

    #[test]
    fn test_parse_command() {
        let topics = Topics::new("heat_monitor");
        assert_eq!(
            topics.parse_command("heat_monitor/cellar/min_temp/set"),
            Some(("cellar".to_string(), ThresholdKey::Min))
        );
        assert_eq!(topics.parse_command("heat_monitor/cellar/min_temp"), None);
        assert_eq!(topics.parse_command("heat_monitor/cellar/humidity/set"), None);
        assert_eq!(topics.parse_command("heat_monitor//max_temp/set"), None);
        assert_eq!(topics.parse_command("other/cellar/max_temp/set"), None);
        assert_eq!(
            topics.parse_command("heat_monitor/cellar/max_temp/set/extra"),
            None
        );
    }

    #[test]
    fn test_state_message_reaches_unit() {
        let integration = integration();
        let touched = integration.process_message(&message(
            "zigbee2mqtt/Greenhouse",
            r#"{"temperature":35.5,"humidity":60}"#,
        ));
        assert_eq!(touched.len(), 1);
        assert!(touched[0].is_on());
        assert_eq!(touched[0].snapshot().current_value, Some(35.5));
    }

    #[test]
    fn test_unrelated_messages_are_ignored() {
        let integration = integration();
        assert!(integration
            .process_message(&message("zigbee2mqtt/Garage", r#"{"temperature":50}"#))
            .is_empty());
        assert!(integration
            .process_message(&message("zigbee2mqtt/Greenhouse", r#"{"battery":80}"#))
            .is_empty());
    }

    #[test]
    fn test_command_sets_threshold() {
        let integration = integration();
        integration.process_message(&message("zigbee2mqtt/Greenhouse", r#"{"temperature":20}"#));
        let touched =
            integration.process_message(&message("heat_monitor/greenhouse/max_temp/set", "15"));
        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].thresholds().max_temp, 15.0);
        assert!(touched[0].is_on());

        assert!(integration
            .process_message(&message("heat_monitor/greenhouse/max_temp/set", "hot"))
            .is_empty());
        assert!(integration
            .process_message(&message("heat_monitor/greenhouse/max_temp/set", "120"))
            .is_empty());
        assert_eq!(touched[0].thresholds().max_temp, 15.0);
    }

    #[test]
    fn test_offline_marks_source_unavailable() {
        let integration = integration();
        integration.process_message(&message("zigbee2mqtt/Greenhouse", r#"{"temperature":40}"#));
        let touched = integration.process_message(&message(
            "zigbee2mqtt/Greenhouse/availability",
            r#"{"state":"offline"}"#,
        ));
        assert_eq!(touched.len(), 1);
        assert!(touched[0].is_on());
        assert!(integration
            .process_message(&message(
                "zigbee2mqtt/Greenhouse/availability",
                r#"{"state":"online"}"#
            ))
            .is_empty());
    }
}

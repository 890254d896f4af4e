//! MQTT input source for zigbee2mqtt temperature sensors.
//!
//! This module provides MQTT client functionality to receive readings from
//! zigbee2mqtt and expose monitor events and threshold controls over MQTT.

mod client;
mod integration;
pub mod reading;

pub use client::{MqttClient, MqttHandle, MqttMessage};
pub use integration::{MqttIntegration, Topics};

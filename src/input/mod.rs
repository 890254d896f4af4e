//! Input sources for monitored units.
//!
//! Current input sources:
//! - `mqtt`: zigbee2mqtt state topics, plus threshold commands and event
//!   publishing on the same broker
//! - `simulation`: synthetic readings for development

pub mod mqtt;
pub mod simulation;

//! Host-side plumbing around the evaluation core.
//!
//! This module provides the pieces a host platform normally owns: an event
//! bus with scoped subscriptions, source metadata lookup, user-adjustable
//! threshold controls and unit setup/unload.

pub mod bus;
pub mod control;
pub mod hub;
pub mod metadata;
pub mod unit;

pub use bus::{BusMessage, EventBus, Subscription};
pub use control::ThresholdControl;
pub use hub::Hub;
pub use metadata::{MetadataRegistry, SourceMetadata};
pub use unit::{Attachment, MonitoredUnit, UnitHandle};

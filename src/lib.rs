//! Heat Monitor library.
//!
//! Watches a numeric sensor reading and raises "out of range" / "back in
//! range" notifications when it crosses configurable thresholds.

pub mod config;
pub mod error;
pub mod host;
pub mod input;
pub mod monitor;

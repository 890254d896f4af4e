//! Reading simulation for testing.
//!
//! Drives every configured source through a slow triangle wave so that each
//! monitor crosses both of its bounds without a broker.

use crate::host::Hub;
use log::info;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

/// Lowest simulated reading (°C).
const SIM_LOW: f64 = -5.0;

/// Highest simulated reading (°C).
const SIM_HIGH: f64 = 40.0;

/// Ticks for one full low-high-low cycle.
const SIM_PERIOD: u64 = 60;

/// Triangle wave between [`SIM_LOW`] and [`SIM_HIGH`], rounded to 0.5.
pub fn simulated_reading(tick: u64, offset: u64) -> f64 {
    let phase = (tick + offset) % SIM_PERIOD;
    let half = SIM_PERIOD / 2;
    let fraction = if phase < half {
        phase as f64 / half as f64
    } else {
        (SIM_PERIOD - phase) as f64 / half as f64
    };
    let value = SIM_LOW + (SIM_HIGH - SIM_LOW) * fraction;
    (value * 2.0).round() / 2.0
}

/// Spawn a task that posts simulated readings for every unit's source.
///
/// Sources are phase-shifted so they do not cross their bounds together.
pub fn run_reading_simulation(hub: Arc<RwLock<Hub>>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(every);
        let mut tick = 0u64;
        loop {
            interval.tick().await;
            {
                let hub = hub.read();
                let sources: Vec<String> = hub.units().map(|u| u.source_id()).collect();
                for (i, source) in sources.iter().enumerate() {
                    let value = simulated_reading(tick, i as u64 * 7);
                    info!("[Sim] {} -> {:.1}", source, value);
                    hub.post_state(source, Some(&value.to_string()));
                }
            }
            tick += 1;
        }
    })
}

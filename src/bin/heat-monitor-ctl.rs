//! Development tool for driving a running heat monitor over MQTT.
//!
//! Usage:
//!   cargo run --bin heat-monitor-ctl -- reading zigbee2mqtt/Greenhouse 31.5
//!   cargo run --bin heat-monitor-ctl -- set greenhouse max 28
//!   cargo run --bin heat-monitor-ctl -- watch

use clap::{Parser, Subcommand, ValueEnum};
use heat_monitor::config::{Config, load_dotenv};
use heat_monitor::input::mqtt::{MqttClient, Topics};
use heat_monitor::monitor::ThresholdKey;
use log::{error, info, warn};
use serde_json::json;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Parser)]
#[command(name = "heat-monitor-ctl")]
#[command(about = "Development tool for a running heat monitor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Bound {
    Min,
    Max,
}

impl From<Bound> for ThresholdKey {
    fn from(bound: Bound) -> Self {
        match bound {
            Bound::Min => ThresholdKey::Min,
            Bound::Max => ThresholdKey::Max,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a zigbee2mqtt-style reading on a source topic
    Reading {
        /// Source topic (e.g. zigbee2mqtt/Greenhouse)
        source: String,
        value: f64,
        /// JSON field carrying the value
        #[arg(long, default_value = "temperature")]
        field: String,
    },
    /// Set a threshold through its command topic
    Set {
        /// Monitor id
        monitor: String,
        bound: Bound,
        value: f64,
    },
    /// Print events and attribute updates until interrupted
    Watch,
}

fn main() {
    load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime.block_on(run(cli)),
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) {
    let config = Config::from_env();
    let topics = Topics::new(config.topic_prefix.clone());

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    let mut mqtt = config.mqtt.clone();
    mqtt.client_id = format!("{}-ctl", mqtt.client_id);
    let mqtt_client = MqttClient::new(&mqtt);
    let client = mqtt_client.client();

    let (msg_tx, mut msg_rx) = mpsc::channel(100);
    let (connected_tx, connected_rx) = oneshot::channel();
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(msg_tx, Some(connected_tx)).await;
    });

    if tokio::time::timeout(Duration::from_secs(10), connected_rx)
        .await
        .is_err()
    {
        error!("Connection timeout after 10 seconds");
        std::process::exit(1);
    }

    match cli.command {
        Commands::Reading {
            source,
            value,
            field,
        } => {
            let payload = json!({ field: value }).to_string();
            info!("Publishing {} to {}", payload, source);
            if let Err(e) = client.publish(&source, &payload, false).await {
                warn!("Failed to publish reading: {}", e);
            }
        }
        Commands::Set {
            monitor,
            bound,
            value,
        } => {
            let topic = topics.command(&monitor, bound.into());
            info!("Publishing {} to {}", value, topic);
            if let Err(e) = client.publish(&topic, &value.to_string(), false).await {
                warn!("Failed to publish threshold: {}", e);
            }
        }
        Commands::Watch => {
            let filter = format!("{}/#", config.topic_prefix);
            if let Err(e) = client.subscribe(&filter).await {
                error!("Failed to subscribe to {}: {}", filter, e);
                std::process::exit(1);
            }
            info!("Watching {} (Ctrl+C to stop)", filter);
            loop {
                tokio::select! {
                    Some(msg) = msg_rx.recv() => {
                        println!("{} {}", msg.topic, msg.payload);
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    // Let the event loop flush outgoing packets
    tokio::time::sleep(Duration::from_millis(500)).await;
    mqtt_handle.abort();
}

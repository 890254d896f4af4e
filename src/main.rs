use clap::Parser;
use heat_monitor::config::{Config, load_dotenv};
use heat_monitor::host::{EventBus, Hub, MetadataRegistry, SourceMetadata};
use heat_monitor::input::mqtt::MqttIntegration;
use heat_monitor::input::simulation::run_reading_simulation;
use heat_monitor::monitor::{EVENT_BACK_IN_RANGE, EVENT_OUT_OF_RANGE};
use log::{error, info, warn};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "heat-monitor")]
#[command(about = "Watches temperature sensors and reports out-of-range readings")]
struct Cli {
    /// Monitor list (JSON)
    #[arg(long, env = "HEAT_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Feed simulated readings instead of connecting to the broker
    #[arg(long)]
    simulate: bool,

    /// Seconds between simulated readings
    #[arg(long, default_value_t = 2)]
    sim_interval: u64,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    // Environment is edited before the runtime spawns its workers
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cli));
}

async fn run(cli: Cli) {
    info!("Starting Heat Monitor");

    let mut config = Config::from_env();
    if let Some(path) = cli.config {
        config.monitors_path = path;
    }
    if let Err(e) = config.load_monitors().and_then(|_| config.validate()) {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    info!("Configuration loaded:");
    info!("  Monitors: {}", config.monitors.len());
    info!(
        "  MQTT broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );
    info!("  Topic prefix: {}", config.topic_prefix);

    if cli.check {
        for monitor in &config.monitors {
            info!(
                "  {} watches {} in [{}, {}]",
                monitor.monitor_id(),
                monitor.source_id,
                monitor.min_temp,
                monitor.max_temp
            );
        }
        return;
    }

    // zigbee2mqtt friendly names double as display names
    let registry = Arc::new(MetadataRegistry::new());
    for monitor in &config.monitors {
        let friendly = monitor.source_id.rsplit('/').next().map(str::to_string);
        registry.set_state_friendly_name(&monitor.source_id, friendly);
    }

    let bus = EventBus::new();
    let metadata: Arc<dyn SourceMetadata> = registry;
    let mut hub = Hub::new(bus.clone(), Some(metadata));
    if let Err(e) = hub.setup_all(&config.monitors) {
        error!("Failed to set up monitors: {}", e);
        std::process::exit(1);
    }

    let _event_log = [EVENT_OUT_OF_RANGE, EVENT_BACK_IN_RANGE].map(|event_type| {
        bus.listen(event_type, |msg| {
            warn!("[Event] {} {}", msg.event_type, msg.data);
        })
    });

    let hub = Arc::new(RwLock::new(hub));
    let input_task = if cli.simulate {
        info!("Simulating readings every {}s", cli.sim_interval);
        run_reading_simulation(hub.clone(), Duration::from_secs(cli.sim_interval.max(1)))
    } else {
        MqttIntegration::new(&config, hub.clone()).start()
    };

    info!("Heat Monitor is running");
    info!("  - Press Ctrl+C to exit");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal");
        }
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    input_task.abort();
    hub.write().shutdown();

    info!("Heat Monitor stopped");
}

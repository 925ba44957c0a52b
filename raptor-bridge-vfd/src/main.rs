//! Zenoh bridge for the Raptor VFD fleet.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use raptor_bridge_vfd::command::{self, CommandDispatcher};
use raptor_bridge_vfd::config::VfdBridgeConfig;
use raptor_bridge_vfd::coordinator::DualWriteCoordinator;
use raptor_bridge_vfd::link::{MainDriveConnection, TcpConnector};
use raptor_bridge_vfd::poller::SnapshotPoller;
use raptor_bridge_vfd::publisher::Publisher;
use raptor_bridge_vfd::state::{ControlState, ControlStore};
use raptor_bridge_vfd::status::{BridgeStatus, StatusPublisher};
use raptor_common::{Format, LoggingConfig};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Zenoh bridge for a main + paired-wheel Modbus-TCP drive fleet.
#[derive(Parser, Debug)]
#[command(name = "raptor-bridge-vfd")]
#[command(about = "Bridges Modbus-TCP drives to Zenoh commands and telemetry")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "raptor-vfd.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = VfdBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    raptor_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting raptor-bridge-vfd");
    info!("Loaded configuration from {:?}", args.config);

    let topics = config.topics()?;
    let [main_ep, inner_ep, outer_ep] = config.endpoints()?;

    if config.control.direction_enabled {
        warn!("Direction control enabled; direction writes may switch the drives' command source");
    } else {
        info!("Direction control disabled; wheel_direction commands are ignored");
    }

    let session = raptor_common::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;

    let main_addr = main_ep.addr();
    let main = Arc::new(
        MainDriveConnection::connect(main_ep, config.write_timeouts())
            .await
            .with_context(|| format!("Failed to connect to main drive at {}", main_addr))?,
    );
    let connector = Arc::new(TcpConnector::new(
        config.read_timeouts(),
        config.write_timeouts(),
    ));

    let store = ControlStore::new(ControlState::initial(
        config.control.wheel_speed.default,
        config.control.chain_speed.default,
    ));
    let wheels = DualWriteCoordinator::new(
        Arc::clone(&connector),
        inner_ep.clone(),
        outer_ep.clone(),
        config.write_policy(),
        config.wheel_settings(),
    );
    let dispatcher = CommandDispatcher::new(
        Arc::clone(&main),
        wheels,
        store,
        config.coils,
        config.control.chain_speed.limits(),
    );

    let poller = SnapshotPoller::new(
        Arc::clone(&main),
        Arc::clone(&connector),
        inner_ep,
        outer_ep,
        config.coils,
        dispatcher.reader(),
    )
    .with_interval(config.poll_interval());
    let state_publisher = Publisher::new(session.clone(), topics.state(), config.format);

    let (tx, rx) = mpsc::channel(config.control.queue_capacity);

    let tasks = vec![
        tokio::spawn(dispatcher.run(rx)),
        tokio::spawn(poller.run(state_publisher)),
        tokio::spawn({
            let session = session.clone();
            let key = topics.command();
            async move {
                if let Err(e) = command::listen(session, key, tx).await {
                    error!("Command listener failed: {}", e);
                }
            }
        }),
    ];

    let status = StatusPublisher::new(
        Publisher::new(session.clone(), topics.status(), Format::Json),
        BridgeStatus::running(
            &config.site,
            &config.device,
            config.drive_addresses(),
            config.control.direction_enabled,
        ),
    );
    if let Err(e) = status.publish_running().await {
        error!("Failed to publish bridge status: {}", e);
    }

    info!(
        state = %topics.state(),
        cmd = %topics.command(),
        "VFD bridge running"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    for task in tasks {
        task.abort();
    }

    if let Err(e) = status.publish_offline().await {
        warn!("Failed to publish offline status: {}", e);
    }

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("VFD bridge stopped");

    Ok(())
}

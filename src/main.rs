use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use std::sync::Arc;

use spm_bridge::cli::Args;
use spm_bridge::config::Config;
use spm_bridge::devices::{DeviceReader, RegisterCatalogue};
use spm_bridge::modbus::ModbusClient;
use spm_bridge::output::MqttConnector;
use spm_bridge::services::{DeliveryEngine, PollCycle, PollSettings};
use spm_bridge::storage::MessageQueue;
use spm_bridge::utils::logging::init_logging;

/// Resolves on Ctrl-C, or SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Ctrl-C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("🛑 Ctrl-C received"),
        _ = terminate => info!("🛑 SIGTERM received"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Nothing to poll without a valid config; this is the only fatal startup path.
    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config '{}': {}", args.config, e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging).context("Failed to install logger")?;

    info!("🖥️  SPM-1 MQTT bridge v{}", spm_bridge::VERSION);
    info!("📄 Loaded config from {}", args.config);
    info!(
        "🔌 Serial: {} @ {} baud, {} data bits, parity {:?}, {} stop bits",
        config.rs485.port,
        config.rs485.baud_rate,
        config.rs485.byte_size,
        config.rs485.parity,
        config.rs485.stop_bits
    );
    info!(
        "📡 Broker: {}:{} topic '{}'",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic
    );

    let client = ModbusClient::new(&config.rs485);
    if !client.is_open() {
        warn!(
            "⚠️  Serial port {} not available yet, readings stay empty until it opens",
            config.rs485.port
        );
    }

    let queue = match MessageQueue::open(config.storage.clone()).await {
        Ok(queue) => queue,
        Err(e) => {
            error!("❌ Failed to open queue database: {}", e);
            std::process::exit(1);
        }
    };

    let catalogue = RegisterCatalogue::spm1();
    info!(
        "📋 {} registers per device across {} modules",
        catalogue.register_count(),
        catalogue.modules.len()
    );

    let poll = PollCycle::new(
        PollSettings::from_config(&config),
        catalogue,
        DeviceReader::new(Arc::new(client)),
        queue,
        Box::new(MqttConnector::new(config.mqtt.clone())),
        DeliveryEngine::new(config.poll.max_batch, config.poll.retain_sent),
    );

    poll.run(shutdown_signal()).await;

    info!("👋 Bridge stopped");
    Ok(())
}

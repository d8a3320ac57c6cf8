use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use btleplug::api::{BDAddr, Manager as _};
use btleplug::platform::Manager;
use clap::Parser;
use tokio::sync::{Mutex, broadcast};

mod config;
mod controller;
mod device;
mod error;
mod manager;
mod messages;
mod monitor;
mod mqtt;
mod scanner;

/// Drives a SwitchBot curtain over BLE, exposed through MQTT.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config_contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config: config::AppConfig = toml::de::from_str(&config_contents)?;

    let address = BDAddr::from(config.device.address.bytes());
    let motion = config.motion.clone().unwrap_or_default();

    let (mqtt_client, mut eventloop) = mqtt::MqttClient::new(&config.mqtt, &config.device.name);
    mqtt_client.subscribe().await?;

    let bt_manager = Manager::new().await?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no Bluetooth adapter found")?;

    let (announcement_tx, announcement_rx) = broadcast::channel(32);
    let controller = Arc::new(Mutex::new(controller::MotionController::new(
        motion.move_timeout(),
        announcement_tx,
    )));

    let (command_tx, command_rx) = broadcast::channel(10);

    let presenter = mqtt_client.clone();
    tokio::task::spawn(async move {
        presenter.publish_announcements(announcement_rx).await;
    });

    let commands = mqtt_client.clone();
    tokio::task::spawn(async move {
        commands.command_loop(&mut eventloop, command_tx).await;
    });

    let core = manager::Manager::new(
        scanner::Scanner::new(central),
        controller,
        address,
        motion.discovery_timeout(),
        command_rx,
    );
    core.run_loop().await;

    mqtt_client.disconnect().await?;

    Ok(())
}

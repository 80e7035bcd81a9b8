//! CLI entry point for sensor-hub
//!
//! Provides a command-line interface for:
//! - Listing the serial ports the system can see
//! - Monitoring one or more boards (readings, messages, port lifecycle)
//! - Sending a single command to a board
//!
//! # Usage
//!
//! List ports:
//! ```bash
//! sensor-hub list
//! ```
//!
//! Monitor the ports from `config/hub.toml` plus one extra:
//! ```bash
//! sensor-hub monitor --port /dev/ttyUSB2 --json
//! ```
//!
//! Drive a vibration channel:
//! ```bash
//! sensor-hub send --port /dev/ttyUSB0 --hold 2000 vibrate 1 128
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sensor_hub::config::{HubConfig, PortDefinition, DEFAULT_CONFIG_PATH};
use sensor_hub::events::{HubEvent, HubEventKind};
use sensor_hub::hardware::list_available_ports;
use sensor_hub::logging;
use sensor_hub::protocol::Command;
use sensor_hub::SerialHub;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sensor-hub")]
#[command(about = "Multi-port serial hub for pressure sensors and vibration actuators", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports available on this machine
    List,

    /// Register ports and print hub events until Ctrl+C
    Monitor {
        /// Extra port to register (repeatable)
        #[arg(long = "port")]
        ports: Vec<String>,

        /// Baud rate for ports given with --port
        #[arg(long)]
        baud: Option<u32>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Open one port, send a command, then close it
    ///
    /// Closing a port always sends the stop command, so actuators run only
    /// for the --hold period.
    Send {
        /// Port to send to
        #[arg(long)]
        port: String,

        /// Baud rate (defaults to the configured rate)
        #[arg(long)]
        baud: Option<u32>,

        /// Milliseconds to keep the port open after sending
        #[arg(long, default_value_t = 0)]
        hold: u64,

        #[command(subcommand)]
        command: SendCommand,
    },
}

#[derive(Subcommand)]
enum SendCommand {
    /// Stop all actuators
    Stop,
    /// Drive a vibration channel
    Vibrate {
        /// Channel number
        channel: u8,
        /// Intensity 0-255
        intensity: u8,
    },
    /// Run a stored preset
    Preset {
        /// Preset number
        number: u32,
    },
    /// Send raw command text (terminator appended if missing)
    Raw {
        /// Command text
        text: String,
    },
}

impl From<SendCommand> for Command {
    fn from(command: SendCommand) -> Self {
        match command {
            SendCommand::Stop => Command::Stop,
            SendCommand::Vibrate { channel, intensity } => Command::Vibrate { channel, intensity },
            SendCommand::Preset { number } => Command::Preset(number),
            SendCommand::Raw { text } => Command::Raw(text),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HubConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    logging::init_from_config(&config)?;

    match cli.command {
        Commands::List => list_ports(),
        Commands::Monitor { ports, baud, json } => monitor(config, ports, baud, json).await,
        Commands::Send {
            port,
            baud,
            hold,
            command,
        } => send_once(config, port, baud, Duration::from_millis(hold), command.into()).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = list_available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{:<24} {}", port.name, port.kind);
    }
    Ok(())
}

async fn monitor(
    mut config: HubConfig,
    extra_ports: Vec<String>,
    baud: Option<u32>,
    json: bool,
) -> Result<()> {
    for id in extra_ports {
        if config.ports.iter().any(|port| port.id == id) {
            continue;
        }
        config.ports.push(PortDefinition {
            baud_rate: baud,
            ..PortDefinition::new(id)
        });
    }
    config.validate()?;
    if config.enabled_ports().is_empty() {
        bail!("no ports to monitor; add [[ports]] to the config or pass --port");
    }

    let hub = SerialHub::with_system_ports(config.hub_settings());
    let mut events = hub.subscribe();

    for failure in hub.register_configured_ports(&config).await {
        warn!(error = %failure, "Port registration failed");
    }
    info!(ports = ?hub.ports(), "Monitoring; press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = events.recv() => match received {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event consumer lagging"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down");
    hub.shutdown().await;
    Ok(())
}

fn print_event(event: &HubEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let time = event.timestamp.format("%H:%M:%S%.3f");
    match &event.kind {
        HubEventKind::Message { text } => println!("{time} {} message: {text}", event.port),
        HubEventKind::SensorUpdated { index, value } => {
            println!("{time} {} sensor[{index}] = {value}", event.port)
        }
        HubEventKind::PressureUpdated { sensors, average } => {
            println!(
                "{time} {} average = {average:.3} over {} sensors",
                event.port,
                sensors.len()
            )
        }
        HubEventKind::PortOpened { baud_rate } => {
            println!("{time} {} opened at {baud_rate} baud", event.port)
        }
        HubEventKind::PortFailed { reason } => {
            println!("{time} {} failed to open: {reason}", event.port)
        }
        HubEventKind::ReadFailed { reason } => {
            println!("{time} {} read failed: {reason}", event.port)
        }
        HubEventKind::PortClosed => println!("{time} {} closed", event.port),
    }
    Ok(())
}

async fn send_once(
    config: HubConfig,
    port: String,
    baud: Option<u32>,
    hold: Duration,
    command: Command,
) -> Result<()> {
    let hub = SerialHub::with_system_ports(config.hub_settings());
    let baud_rate = baud.unwrap_or(config.serial.baud_rate);

    hub.register_port(&port, baud_rate)
        .await
        .with_context(|| format!("opening {port}"))?;

    // Closing a port always sends a stop.
    let result = match command {
        Command::Stop => Ok(()),
        _ => hub.send_to_port(&port, &command),
    };
    if result.is_ok() && !hold.is_zero() {
        info!(port = %port, hold_ms = hold.as_millis() as u64, "Holding port open");
        tokio::time::sleep(hold).await;
    }
    hub.shutdown().await;

    result.with_context(|| format!("sending {command} to {port}"))?;
    println!("Sent {command} to {port}");
    Ok(())
}

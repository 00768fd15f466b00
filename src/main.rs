// MIT License - Copyright (c) 2026 Peter Wright
// Command-line bridge

use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use dmp_lan_bridge::constants::{
    DEFAULT_COMMAND_INTERVAL, DEFAULT_CONNECT_TIMEOUT, DEFAULT_KEEPALIVE_INTERVAL,
    DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_PORT,
};
use dmp_lan_bridge::{
    ArmOptions, ConnectionRegistry, DmpPanel, EventListener, ListenerConfig, OutputMode,
    PanelConfig,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "dmp-bridge")]
#[command(about = "Talk to a DMP alarm panel over its LAN interface")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Op,
}

#[derive(Subcommand)]
enum Op {
    /// Print area and zone status
    Status,
    /// Arm one or more areas
    Arm {
        /// Comma-separated area numbers
        #[arg(value_delimiter = ',', required = true)]
        areas: Vec<u8>,
        #[arg(long)]
        bypass_faulted: bool,
        #[arg(long)]
        force_arm: bool,
        /// Instant flag; omitted from the command when not given
        #[arg(long)]
        instant: Option<bool>,
    },
    /// Disarm one or more areas
    Disarm {
        #[arg(value_delimiter = ',', required = true)]
        areas: Vec<u8>,
    },
    /// Bypass a zone
    Bypass { zone: u16 },
    /// Restore a bypassed zone
    Restore { zone: u16 },
    /// Drive an output (on, off, pulse, momentary)
    Output { output: u16, mode: String },
    /// Reset latched sensors
    SensorReset,
    /// List user codes
    Users,
    /// List user profiles
    Profiles,
    /// Check whether a code (or PIN) exists on the panel
    CheckCode {
        code: String,
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        include_pin: bool,
    },
    /// Run the realtime event server and print classified events
    Listen {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Seconds to run (0 = until signalled)
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
}

impl Op {
    fn name(&self) -> &'static str {
        match self {
            Op::Status => "status",
            Op::Arm { .. } => "arm",
            Op::Disarm { .. } => "disarm",
            Op::Bypass { .. } => "bypass",
            Op::Restore { .. } => "restore",
            Op::Output { .. } => "output",
            Op::SensorReset => "sensor_reset",
            Op::Users => "users",
            Op::Profiles => "profiles",
            Op::CheckCode { .. } => "check_code",
            Op::Listen { .. } => "listen",
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    panel: Option<PanelToml>,
    #[serde(default)]
    listener: ListenerToml,
}

#[derive(Debug, Deserialize)]
struct PanelToml {
    host: String,
    #[serde(default = "default_panel_port")]
    port: u16,
    account: String,
    #[serde(default)]
    remote_key: String,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_command_interval")]
    command_interval_ms: u64,
    #[serde(default = "default_keepalive_interval")]
    keepalive_interval_ms: u64,
}

fn default_panel_port() -> u16 {
    DEFAULT_PORT
}
fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}
fn default_command_interval() -> u64 {
    DEFAULT_COMMAND_INTERVAL.as_millis() as u64
}
fn default_keepalive_interval() -> u64 {
    DEFAULT_KEEPALIVE_INTERVAL.as_millis() as u64
}

#[derive(Debug, Deserialize)]
struct ListenerToml {
    #[serde(default = "default_listen_host")]
    host: String,
    #[serde(default = "default_listen_port")]
    port: u16,
    #[serde(default = "default_acknowledge")]
    acknowledge: bool,
}

impl Default for ListenerToml {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
            acknowledge: default_acknowledge(),
        }
    }
}

fn default_listen_host() -> String {
    DEFAULT_LISTEN_HOST.to_string()
}
fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}
fn default_acknowledge() -> bool {
    true
}

fn build_panel_config(panel: &PanelToml) -> PanelConfig {
    PanelConfig::builder()
        .host(&panel.host)
        .port(panel.port)
        .account(&panel.account)
        .remote_key(&panel.remote_key)
        .connect_timeout_ms(panel.connect_timeout_ms)
        .command_interval_ms(panel.command_interval_ms)
        .keepalive_interval_ms(panel.keepalive_interval_ms)
        .build()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One JSON line per result.
#[derive(Serialize)]
struct Line<T: Serialize> {
    now: u64,
    op: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn now_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

fn emit<T: Serialize>(op: &'static str, data: Option<T>) {
    let line = Line {
        now: now_epoch_ms(),
        op,
        ok: true,
        data,
        error: None,
    };
    match serde_json::to_string(&line) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("Failed to serialize output: {e}"),
    }
}

fn emit_error(op: &'static str, error: &anyhow::Error) {
    let line: Line<()> = Line {
        now: now_epoch_ms(),
        op,
        ok: false,
        data: None,
        error: Some(format!("{error:#}")),
    };
    if let Ok(json) = serde_json::to_string(&line) {
        println!("{json}");
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=dmp_lan_bridge=debug). Default: info.
    // Logs go to stderr so stdout stays JSON.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_text =
        std::fs::read_to_string(&cli.config).context("Failed to read config file")?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;

    let op = cli.command.name();
    let result = match cli.command {
        Op::Listen {
            host,
            port,
            duration,
        } => listen(config.listener, host, port, duration).await,
        command => {
            let panel = config
                .panel
                .as_ref()
                .context("Missing [panel] section in config file")?;
            run_panel_command(build_panel_config(panel), command).await
        }
    };

    if let Err(e) = &result {
        emit_error(op, e);
    }
    result
}

async fn run_panel_command(config: PanelConfig, command: Op) -> Result<()> {
    let panel = DmpPanel::connect(config, ConnectionRegistry::new())
        .await
        .context("Failed to connect to panel")?;

    let result = execute(&panel, command).await;
    panel.disconnect().await;
    result
}

async fn execute(panel: &DmpPanel, command: Op) -> Result<()> {
    let op = command.name();
    match command {
        // connect() already read the status
        Op::Status => emit(op, Some(panel.status().await)),
        Op::Arm {
            areas,
            bypass_faulted,
            force_arm,
            instant,
        } => {
            let options = ArmOptions {
                bypass_faulted,
                force_arm,
                instant,
            };
            panel.arm_areas(&areas, options).await?;
            emit(op, Some(areas));
        }
        Op::Disarm { areas } => {
            panel.disarm_areas(&areas).await?;
            emit(op, Some(areas));
        }
        Op::Bypass { zone } => {
            panel.bypass_zone(zone).await?;
            emit(op, Some(zone));
        }
        Op::Restore { zone } => {
            panel.restore_zone(zone).await?;
            emit(op, Some(zone));
        }
        Op::Output { output, mode } => {
            let Some(parsed) = OutputMode::from_name(&mode) else {
                bail!("Unknown output mode '{mode}' (expected on, off, pulse or momentary)");
            };
            panel.set_output(output, parsed).await?;
            emit(op, Some(output));
        }
        Op::SensorReset => {
            panel.sensor_reset().await?;
            emit::<()>(op, None);
        }
        Op::Users => emit(op, Some(panel.user_codes().await?)),
        Op::Profiles => emit(op, Some(panel.user_profiles().await?)),
        Op::CheckCode { code, include_pin } => {
            let user = panel.check_code(&code, include_pin).await?;
            emit(op, Some(user));
        }
        Op::Listen { .. } => bail!("listen does not use a panel session"),
    }
    Ok(())
}

async fn listen(
    listener: ListenerToml,
    host: Option<String>,
    port: Option<u16>,
    duration: u64,
) -> Result<()> {
    let config = ListenerConfig::builder()
        .host(host.unwrap_or(listener.host))
        .port(port.unwrap_or(listener.port))
        .acknowledge(listener.acknowledge)
        .build();

    let server = EventListener::new(config);
    let mut events = server.subscribe();
    let addr = server
        .start()
        .await
        .context("Failed to start event listener")?;
    info!("Listening for panel events on {addr}");

    let mut sigterm = signal(SignalKind::terminate())?;
    let deadline = async {
        if duration > 0 {
            tokio::time::sleep(Duration::from_secs(duration)).await;
        } else {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => emit("event", Some(event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    server.stop().await;
    info!("Shutdown complete");
    Ok(())
}

// enocean-ble: EnOcean BLE gateway CLI
//
// Commission wall switches, discover devices nearby and print authenticated
// telegrams as they arrive.

mod config;
mod radio;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use enocean_ble_core::{
    CommissionOutcome, CommissioningStore, DeviceId, Gateway, GatewayError, GatewayOptions,
    SecurityKey, SledStorage, StorageBackend, Telegram,
};
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "enocean-ble")]
#[command(about = "EnOcean BLE telegram gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage commissioned devices
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },
    /// List EnOcean devices advertising nearby
    Scan {
        /// Scan duration in seconds (defaults to the configured timeout)
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Receive telegrams until interrupted
    Monitor {
        /// Accept unsigned telegrams
        #[arg(long)]
        no_auth: bool,
        /// Accept any counter on unsigned telegrams
        #[arg(long, requires = "no_auth")]
        no_monotonic: bool,
        /// Print one JSON object per telegram
        #[arg(long)]
        json: bool,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// Commission from a device's QR/NFC commissioning string
    Import { code: String },
    /// Commission by device id and 32-character hex key. Without a key, a
    /// random one is generated for an emulated device and printed.
    Add { device_id: String, key: Option<String> },
    List,
    Remove { device_id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Device { action } => cmd_device(action),
        Commands::Scan { timeout } => cmd_scan(timeout).await,
        Commands::Monitor {
            no_auth,
            no_monotonic,
            json,
        } => cmd_monitor(no_auth, no_monotonic, json).await,
        Commands::Config { action } => cmd_config(action),
    }
}

fn open_store(config: &config::Config) -> Result<Arc<CommissioningStore>> {
    let path = config.storage_dir()?;
    let backend: Arc<dyn StorageBackend> = Arc::new(
        SledStorage::open(&path)
            .with_context(|| format!("Failed to open commissioning database at {}", path.display()))?,
    );
    Ok(Arc::new(
        CommissioningStore::open(backend).context("Failed to load commissioned devices")?,
    ))
}

fn cmd_device(action: DeviceAction) -> Result<()> {
    let config = config::Config::load()?;
    let store = open_store(&config)?;

    match action {
        DeviceAction::Import { code } => {
            let (data, outcome) = store
                .commission_from_string(&code)
                .context("Failed to commission device")?;
            print_outcome(data.device_id, outcome);
            println!("  Address:  {}", data.address_hex().bright_cyan());
            println!("  Product:  {} rev {}", data.ordering_code, data.step_code_revision);
            if let Some(serial) = &data.serial {
                println!("  Serial:   {}", serial);
            }
        }

        DeviceAction::Add { device_id, key } => {
            let device_id: DeviceId = device_id.parse()?;
            let generated = key.is_none();
            let key = match key {
                Some(hex) => SecurityKey::from_hex(&hex)?,
                None => SecurityKey::generate(),
            };
            let outcome = store.commission(device_id, key.as_bytes())?;
            print_outcome(device_id, outcome);
            if generated {
                println!("  Key:      {}", key.to_hex().bright_yellow());
            }
        }

        DeviceAction::List => {
            let devices = store.devices();
            if devices.is_empty() {
                println!("{}", "No commissioned devices.".dimmed());
            } else {
                println!("{} ({} total)", "Devices".bold(), devices.len());
                println!();
                for device_id in devices {
                    let counter = store
                        .lookup(device_id)
                        .map(|r| r.rolling_counter)
                        .unwrap_or_default();
                    println!(
                        "  {} {}  counter {}",
                        "•".bright_green(),
                        device_id.to_string().bright_cyan(),
                        counter
                    );
                }
            }
        }

        DeviceAction::Remove { device_id } => {
            let device_id: DeviceId = device_id.parse()?;
            store.decommission(device_id)?;
            println!("{} Removed device {}", "✓".green(), device_id.to_string().bright_cyan());
        }
    }

    Ok(())
}

fn print_outcome(device_id: DeviceId, outcome: CommissionOutcome) {
    match outcome {
        CommissionOutcome::Registered => {
            println!("{} Commissioned {}", "✓".green(), device_id.to_string().bright_cyan());
        }
        CommissionOutcome::Replaced { previous_counter } => {
            println!(
                "{} Re-commissioned {} (counter reset from {})",
                "✓".green(),
                device_id.to_string().bright_cyan(),
                previous_counter
            );
        }
    }
}

async fn cmd_scan(timeout: Option<u64>) -> Result<()> {
    let config = config::Config::load()?;
    let timeout = timeout
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| config.scan.scan_timeout());

    println!("Scanning for {}s...", timeout.as_secs());
    let found = radio::discover(config.adapter_index, timeout)
        .await
        .context("Scan failed")?;

    if found.is_empty() {
        println!("{}", "No EnOcean devices found.".dimmed());
        return Ok(());
    }

    let store = open_store(&config)?;
    println!("{} ({} found)", "EnOcean devices".bold(), found.len());
    println!();
    for adv in found {
        let commissioned = if store.contains(adv.device_id) {
            "commissioned".green()
        } else {
            "new".yellow()
        };
        println!(
            "  {} {}  {}  {}  {}",
            "•".bright_green(),
            adv.device_id.to_string().bright_cyan(),
            adv.model.friendly_name(),
            adv.address.dimmed(),
            commissioned
        );
        let rssi = adv
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "?".to_string());
        let signed = if adv.signed { "signed" } else { "unsigned" };
        println!("    counter {}  {}  rssi {}", adv.counter, signed, rssi);
    }

    Ok(())
}

async fn cmd_monitor(no_auth: bool, no_monotonic: bool, json: bool) -> Result<()> {
    let config = config::Config::load()?;
    let mut options = config.gateway_options();
    if no_auth {
        options = GatewayOptions::unauthenticated()
            .with_counter_monotonicity(options.enforce_counter_monotonicity && !no_monotonic);
    }

    let store = open_store(&config)?;
    if store.is_empty() {
        println!(
            "{} No commissioned devices; every telegram will be rejected",
            "!".yellow()
        );
    }

    let gateway = Gateway::new(store, Arc::new(radio::BtleRadio::new(config.adapter_index)));
    gateway.on_telegram(move |telegram: Telegram| print_telegram(&telegram, json));
    gateway.on_error(|error: GatewayError| {
        eprintln!("{} {}", "✗".red(), error);
    });

    let mut attempt = 0;
    loop {
        match gateway.start(options).await {
            Ok(()) => break,
            Err(e) if attempt < config.scan.retry_count => {
                attempt += 1;
                warn!("Start attempt {} failed: {}", attempt, e);
                tokio::time::sleep(config.scan.retry_timeout()).await;
            }
            Err(e) => return Err(e).context("Failed to start gateway"),
        }
    }

    println!(
        "{} Monitoring (auth {}). Press Ctrl-C to stop.",
        "✓".green(),
        if options.auth_required { "required" } else { "off" }
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    gateway.stop().await?;

    let stats = gateway.stats();
    println!();
    println!(
        "Accepted {}  rejected {}",
        stats.telegrams_accepted, stats.frames_rejected
    );
    Ok(())
}

fn print_telegram(telegram: &Telegram, json: bool) {
    if json {
        match serde_json::to_string(telegram) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize telegram: {}", e),
        }
        return;
    }

    let detail = match telegram.wall_switch() {
        Some(state) => format!(
            "{}  battery {}%",
            if state.is_on { "ON".green() } else { "OFF".red() },
            state.battery
        ),
        None => hex_payload(telegram.payload()),
    };
    let received = telegram.received_at();
    println!(
        "{} {} #{}  {}",
        format!("{}.{:03}", received / 1000, received % 1000).dimmed(),
        telegram.source_id().to_string().bright_cyan(),
        telegram.sequence_counter(),
        detail
    );
}

fn hex_payload(payload: &[u8]) -> String {
    payload.iter().map(|b| format!("{:02x}", b)).collect()
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<30} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

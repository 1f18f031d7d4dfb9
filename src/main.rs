// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use ddc_control_client::model::Category;
use ddc_control_client::wire::parse_int;
use ddc_control_client::{
    Config, ControlClient, Device, DeviceKey, Feature, Transport, TransportKind,
};

#[macro_use]
extern crate tracing;

#[derive(Parser)]
#[command(name = "ddc-control", version, about = "Inspect and adjust DDC/CI displays")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured transport (dbus or cli)
    #[arg(long, global = true)]
    transport: Option<TransportKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List displays and their features
    List {
        /// Read current values as well
        #[arg(long)]
        values: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Read one feature
    Get { device: String, code: String },
    /// Write one feature
    Set {
        device: String,
        code: String,
        value: i64,
    },
    /// Switch input source by value or label
    Input { device: String, input: String },
    /// Print changes as they happen
    Watch,
    /// Print the effective configuration
    Config,
}

fn setup_logs() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new(format!(
        "warn,ddc_control_client=info,{}=info",
        env!("CARGO_CRATE_NAME")
    )));

    if let Ok(journal_layer) = tracing_journald::layer() {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .with(journal_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    }
}

fn build_transport(config: &Config) -> anyhow::Result<Arc<dyn Transport>> {
    match config.transport {
        #[cfg(feature = "dbus-transport")]
        TransportKind::Dbus => Ok(Arc::new(
            ddc_control_client::transport::dbus::DbusTransport::new(config),
        )),
        #[cfg(feature = "cli-transport")]
        TransportKind::Cli => Ok(Arc::new(
            ddc_control_client::transport::cli::CliTransport::new(config),
        )),
        #[allow(unreachable_patterns)]
        other => bail!("the {other} transport was not compiled in"),
    }
}

/// Match a device by key, transport id or model name
fn select_device(client: &ControlClient, selector: &str) -> anyhow::Result<Device> {
    let devices = client.registry().list_devices();
    let wanted = selector.to_lowercase();
    devices
        .iter()
        .find(|d| d.key().as_str() == selector || d.id == selector)
        .or_else(|| devices.iter().find(|d| d.model.to_lowercase() == wanted))
        .or_else(|| devices.iter().find(|d| d.display_name().to_lowercase().contains(&wanted)))
        .cloned()
        .with_context(|| format!("no display matches `{selector}`"))
}

fn parse_code(text: &str) -> anyhow::Result<u8> {
    let code = parse_int(text).with_context(|| format!("`{text}` is not a feature code"))?;
    u8::try_from(code).with_context(|| format!("feature code {code} is outside 0-255"))
}

fn describe(feature: &Feature) -> String {
    let value = match feature.choice_label(feature.current_value) {
        Some(label) => format!("{label} ({})", feature.current_value),
        None => format!("{}/{}", feature.current_value, feature.max_value),
    };
    let mut flags = String::new();
    if !feature.is_mutable {
        flags.push_str(" [read-only]");
    }
    if !feature.is_available {
        flags.push_str(" [unavailable]");
    }
    format!(
        "  {:#04x} {:<28} {:<10} {}{}",
        feature.code,
        feature.name,
        feature.category.as_str(),
        value,
        flags
    )
}

fn print_device(device: &Device) {
    let state = if device.connected { "" } else { " (disconnected)" };
    println!("{} [{}]{}", device.display_name(), device.key(), state);
    if !device.mccs_version.is_empty() {
        println!("  MCCS {}", device.mccs_version);
    }
    for category in Category::ALL {
        for feature in device.features.iter().filter(|f| f.category == category) {
            println!("{}", describe(feature));
        }
    }
}

async fn list(client: &ControlClient, values: bool, json: bool) -> anyhow::Result<()> {
    if values {
        for device in client.registry().list_devices() {
            if device.connected {
                if let Err(err) = client.load_values(&device.key()).await {
                    warn!(device = %device.key(), "Failed to read values: {err}");
                }
            }
        }
    }
    let devices = client.registry().list_devices();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    } else if devices.is_empty() {
        println!("No displays found");
    } else {
        for device in &devices {
            print_device(device);
        }
    }
    Ok(())
}

async fn watch(client: &ControlClient) -> anyhow::Result<()> {
    let devices_client = client.clone();
    let _subscription = client.registry().subscribe(
        move || {
            for device in devices_client.registry().list_devices() {
                let state = if device.connected { "connected" } else { "disconnected" };
                println!("{} [{}] {}", device.display_name(), device.key(), state);
            }
        },
        |key: &DeviceKey, feature: &Feature| {
            println!("{key}:{}", describe(feature));
        },
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    info!("Watching for display changes, press Ctrl+C to stop");
    client.run_events(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logs();
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(transport) = cli.transport {
        config.transport = transport;
    }

    if let Command::Config = cli.command {
        if let Some(path) = cli.config.or_else(Config::default_path) {
            println!("# {}", path.display());
        }
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let client = ControlClient::new(build_transport(&config)?, &config);
    client
        .refresh_all()
        .await
        .with_context(|| format!("failed to reach displays via {}", client.transport_name()))?;

    match cli.command {
        Command::List { values, json } => list(&client, values, json).await?,
        Command::Get { device, code } => {
            let device = select_device(&client, &device)?;
            let feature = client.read_value(&device.key(), parse_code(&code)?).await?;
            println!("{}", describe(&feature));
        }
        Command::Set {
            device,
            code,
            value,
        } => {
            let device = select_device(&client, &device)?;
            let handle = client.request_value_change(&device.key(), parse_code(&code)?, value)?;
            let applied = handle.applied().await?;
            println!("{} set to {applied}", device.display_name());
        }
        Command::Input { device, input } => {
            let device = select_device(&client, &device)?;
            let value = match parse_int(&input) {
                Some(value) => value,
                None => device
                    .inputs
                    .iter()
                    .find(|choice| choice.label().eq_ignore_ascii_case(&input))
                    .map(|choice| choice.value())
                    .with_context(|| format!("{} has no input `{input}`", device.display_name()))?,
            };
            let applied = client.request_input_switch(&device.key(), value)?.applied().await?;
            println!("{} switched to input {applied:#04x}", device.display_name());
        }
        Command::Watch => watch(&client).await?,
        Command::Config => {}
    }
    Ok(())
}

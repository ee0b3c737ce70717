//! `zhonghong`: command line front end for a ZhongHong HVAC gateway.
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (or `--debug`);
//! results are printed to stdout as JSON.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use zhonghong_client::protocol::{DeviceAddress, FanSpeed, Mode};
use zhonghong_client::{Gateway, GatewayConfig, DEFAULT_PORT};

#[derive(Parser, Debug)]
#[command(name = "zhonghong", version, about = "Control ZhongHong HVAC gateways")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Gateway host (overrides the configuration file)
    #[arg(long)]
    host: Option<String>,

    /// Gateway port (overrides the configuration file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Reply timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Serve Prometheus metrics on this address
    #[cfg(feature = "prometheus")]
    #[arg(long)]
    metrics_addr: Option<std::net::SocketAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover all units and print their state
    List,
    /// Query one unit, e.g. `query 1-1-3`
    Query { address: DeviceAddress },
    /// Change settings of one unit
    Set {
        address: DeviceAddress,
        #[arg(long, value_enum)]
        power: Option<Power>,
        /// cool, heat, fan, dry or auto
        #[arg(long)]
        mode: Option<Mode>,
        /// low, mid, high or auto
        #[arg(long)]
        fan: Option<FanSpeed>,
        /// Target temperature in degrees Celsius
        #[arg(long)]
        temperature: Option<f32>,
    },
    /// Print state changes as JSON lines until interrupted
    Monitor,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Power {
    On,
    Off,
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = match (&cli.config, &cli.host) {
        (Some(path), _) => GatewayConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        (None, Some(host)) => GatewayConfig::new(host.clone(), DEFAULT_PORT),
        (None, None) => bail!("either --config or --host is required"),
    };
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.command_timeout_ms = timeout_ms;
    }
    config.validate()?;
    Ok(config)
}

#[cfg(feature = "prometheus")]
fn start_metrics(cli: &Cli) -> Result<()> {
    if let Some(addr) = cli.metrics_addr {
        zhonghong_metrics::install_prometheus(addr).context("starting metrics exporter")?;
        info!(%addr, "serving metrics");
    }
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn start_metrics(_cli: &Cli) -> Result<()> {
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    start_metrics(&cli)?;

    let config = load_config(&cli)?;
    info!(endpoint = %config.endpoint(), "connecting");
    let gateway = Gateway::connect(config).await?;

    let result = run(&gateway, cli.command).await;
    gateway.close().await?;
    result
}

async fn run(gateway: &Gateway, command: Commands) -> Result<()> {
    match command {
        Commands::List => {
            gateway.query_all().await?;
            print_json(&gateway.list())?;
        }
        Commands::Query { address } => {
            gateway.query(address).await?;
            print_json(&gateway.get(address)?)?;
        }
        Commands::Set {
            address,
            power,
            mode,
            fan,
            temperature,
        } => {
            if power.is_none() && mode.is_none() && fan.is_none() && temperature.is_none() {
                bail!("nothing to set; pass --power, --mode, --fan or --temperature");
            }
            if let Some(power) = power {
                gateway.set_power(address, matches!(power, Power::On)).await?;
            }
            if let Some(mode) = mode {
                gateway.set_mode(address, mode).await?;
            }
            if let Some(fan) = fan {
                gateway.set_fan_speed(address, fan).await?;
            }
            if let Some(celsius) = temperature {
                gateway.set_temperature(address, celsius).await?;
            }
            gateway.query(address).await?;
            print_json(&gateway.get(address)?)?;
        }
        Commands::Monitor => {
            gateway.subscribe(|state| {
                if let Ok(line) = serde_json::to_string(state) {
                    println!("{line}");
                }
            });
            gateway.query_all().await?;

            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    info!("interrupted");
                }
                _ = gateway.closed() => bail!("gateway link failed"),
            }
            print_json(&gateway.diagnostics())?;
        }
    }
    Ok(())
}

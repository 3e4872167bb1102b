//! sbs-relay: UDP aircraft reports in, Kalman-smoothed SBS lines out.
//!
//! Three tasks run until Ctrl-C: the UDP ingest loop, the prediction
//! scheduler, and the TCP accept loop feeding the broadcast hub.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use sbs_core::config::{self, Config};
use sbs_core::RelayError;

mod hub;
mod ingest;
mod logging;
mod passthrough;
mod registry;
mod scheduler;

use hub::BroadcastHub;
use passthrough::PassthroughRelay;
use registry::TrackRegistry;
use scheduler::Scheduler;

#[derive(Parser)]
#[command(
    name = "sbs-relay",
    version,
    about = "Relay UDP aircraft reports to SBS BaseStation subscribers"
)]
struct Cli {
    /// Config file (default: ~/.sbs-relay/config.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track aircraft with a Kalman filter and broadcast predictions
    Run(RunArgs),

    /// Convert each report straight to SBS without filtering
    Passthrough(NetArgs),

    /// Print the effective configuration
    Config(RunArgs),
}

#[derive(Args, Debug, Default)]
struct NetArgs {
    /// UDP port for inbound JSON reports
    #[arg(short = 'u', long, env = "SBS_RELAY_UDP_PORT")]
    udp_port: Option<u16>,

    /// Address the SBS output listener binds to
    #[arg(short = 'l', long, env = "SBS_RELAY_LISTEN_HOST")]
    listen_host: Option<String>,

    /// TCP port for SBS subscribers
    #[arg(short = 'p', long, env = "SBS_RELAY_TCP_PORT")]
    tcp_port: Option<u16>,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    #[command(flatten)]
    net: NetArgs,

    /// Prediction/output period in milliseconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: Option<u64>,

    /// Drop tracks with no report for this many seconds
    #[arg(long, value_parser = parse_ttl)]
    track_ttl: Option<f64>,
}

fn parse_ttl(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if v.is_finite() && v > 0.0 {
        Ok(v)
    } else {
        Err("must be a positive number of seconds".into())
    }
}

impl NetArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.udp_port {
            config.ingest.port = port;
        }
        if let Some(host) = &self.listen_host {
            config.output.host = host.clone();
        }
        if let Some(port) = self.tcp_port {
            config.output.port = port;
        }
    }
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        self.net.apply(config);
        if let Some(ms) = self.interval_ms {
            config.predictor.interval_ms = ms;
        }
        if self.track_ttl.is_some() {
            config.predictor.track_ttl = self.track_ttl;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.quiet);

    let mut config = load_config(cli.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let result = match cli.command {
        Commands::Config(args) => {
            args.apply(&mut config);
            print!("{}", config::serialize_config(&config));
            Ok(())
        }
        Commands::Run(args) => {
            args.apply(&mut config);
            cmd_run(config).await
        }
        Commands::Passthrough(args) => {
            args.apply(&mut config);
            cmd_passthrough(config).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// An explicit path must load; a broken default file only warns.
fn load_config(path: Option<&Path>) -> sbs_core::Result<Config> {
    if let Some(path) = path {
        return config::load_config_from(path);
    }
    match config::load_config() {
        Ok(c) => Ok(c),
        Err(e) => {
            warn!(error = %e, "Ignoring default config file");
            Ok(Config::default())
        }
    }
}

fn bind_error(what: &str, addr: &str, e: io::Error) -> RelayError {
    RelayError::Io(io::Error::new(e.kind(), format!("bind {what} {addr}: {e}")))
}

/// Bind both sockets up front; failure here is fatal.
async fn bind_sockets(config: &Config) -> sbs_core::Result<(tokio::net::UdpSocket, TcpListener)> {
    let socket = ingest::bind(config.ingest.port)
        .await
        .map_err(|e| bind_error("UDP", &format!("0.0.0.0:{}", config.ingest.port), e))?;
    let addr = format!("{}:{}", config.output.host, config.output.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| bind_error("TCP", &addr, e))?;
    Ok((socket, listener))
}

async fn cmd_run(config: Config) -> sbs_core::Result<()> {
    let (socket, listener) = bind_sockets(&config).await?;

    let registry = Arc::new(TrackRegistry::new(config.filter));
    let hub = Arc::new(BroadcastHub::new());
    let scheduler = Scheduler::new(
        Arc::clone(&registry),
        Arc::clone(&hub),
        Duration::from_millis(config.predictor.interval_ms),
        config.predictor.track_ttl,
    );

    info!(
        udp_port = config.ingest.port,
        tcp = %format!("{}:{}", config.output.host, config.output.port),
        "sbs-relay running"
    );

    let tasks = [
        tokio::spawn(ingest::run_ingest(socket, registry.clone())),
        tokio::spawn(Arc::clone(&hub).accept_loop(listener)),
        tokio::spawn(scheduler.run()),
    ];

    tokio::signal::ctrl_c().await?;
    for task in &tasks {
        task.abort();
    }

    let stats = registry.stats();
    info!(
        tracks = stats.tracks,
        measurements = stats.measurements,
        rejected_updates = stats.rejected_updates,
        subscribers = hub.len().await,
        "Shutting down"
    );
    Ok(())
}

async fn cmd_passthrough(config: Config) -> sbs_core::Result<()> {
    let (socket, listener) = bind_sockets(&config).await?;

    let hub = Arc::new(BroadcastHub::new());
    let relay = Arc::new(PassthroughRelay::new(Arc::clone(&hub)));

    info!(
        udp_port = config.ingest.port,
        tcp = %format!("{}:{}", config.output.host, config.output.port),
        "sbs-relay passthrough running"
    );

    let tasks = [
        tokio::spawn(ingest::run_ingest(socket, relay)),
        tokio::spawn(Arc::clone(&hub).accept_loop(listener)),
    ];

    tokio::signal::ctrl_c().await?;
    for task in &tasks {
        task.abort();
    }
    info!("Shutting down");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

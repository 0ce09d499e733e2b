//! fleetd — the FleetGrid daemon.
//!
//! Single binary that assembles all FleetGrid subsystems:
//! - State store (redb): map graph and command outbox
//! - Message bus + bus workers
//! - Route planner and traffic arbiter
//! - Presence monitor and command redelivery
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! fleetd standalone --config /etc/fleetgrid/fleet.toml --port 8470
//! fleetd import-map --file warehouse.json --data-dir /var/lib/fleetgrid
//! ```

mod standalone;
mod workers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleet_core::FleetConfig;
use fleetgrid_state::{MapDocument, StateStore};

const DEFAULT_LOG_FILTER: &str = "info,fleetd=debug,fleetgrid=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "FleetGrid daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every subsystem in one process.
    Standalone {
        /// Path to fleet.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Metrics summary interval in seconds.
        #[arg(long, default_value = "60")]
        metrics_interval: u64,
    },

    /// Validate a JSON map document and load it into the store.
    ImportMap {
        /// Map document with `nodes` and `edges`.
        #[arg(long)]
        file: PathBuf,

        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
            metrics_interval,
        } => {
            let mut fleet_config = match config {
                Some(path) => FleetConfig::from_file(&path)?,
                None => FleetConfig::default(),
            };
            if let Some(port) = port {
                fleet_config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                fleet_config.server.data_dir = data_dir;
            }
            standalone::run_standalone(fleet_config, metrics_interval).await
        }
        Command::ImportMap { file, data_dir } => import_map(&file, &data_dir),
    }
}

fn import_map(file: &std::path::Path, data_dir: &std::path::Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let doc: MapDocument = serde_json::from_str(&raw)?;

    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(standalone::DB_FILE);
    let store = StateStore::open(&db_path)?;
    let summary = store.import_map(&doc)?;

    info!(
        path = ?db_path,
        nodes = summary.nodes,
        edges = summary.edges,
        "map imported"
    );
    println!("imported {} nodes, {} edges", summary.nodes, summary.edges);
    Ok(())
}

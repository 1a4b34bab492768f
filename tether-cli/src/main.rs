//! Tether — registry and config-center agents.
//!
//! # Usage
//!
//! ```text
//! tether config-sync <MAPPING> [--log-file <path> | --no-log-file]
//! tether monitor [--service <name>] [--output-dir service_ips] [--interval-secs 10]
//! tether register [--service <name>] [--ip 127.0.0.1] [--port 4000] [--metadata k=v]...
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config_sync::ConfigSyncArgs, monitor::MonitorArgs, register::RegisterArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Keep local files and processes in step with a Nacos registry and config center",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch remote configs listed in a mapping file and write them to disk.
    ConfigSync(ConfigSyncArgs),

    /// Poll a service's instances and persist the healthy ones.
    Monitor(MonitorArgs),

    /// Register this instance, heartbeat, and deregister on shutdown.
    Register(RegisterArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::ConfigSync(args) => args.run(),
        Commands::Monitor(args) => args.run(),
        Commands::Register(args) => args.run(),
    }
}

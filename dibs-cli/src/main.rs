//! dibs: distributed module development sync.
//!
//! # Usage
//!
//! ```text
//! dibs client [--config dibs.yaml] [--src-dir .] [--build CMD] [--test CMD] [--start CMD] ...
//! dibs host   [--config host.yaml] [--base-dir ~/.dibs] [--listen 127.0.0.1:35000] ...
//! ```
//!
//! Every flag can also be set through its `DIBS_*` environment variable.
//! Flags override the YAML file, which overrides built-in defaults.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{client::ClientArgs, host::HostArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dibs",
    version,
    about = "Watch, build, test, push and restart a module against a shared git host",
    long_about = None,
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "DIBS_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the local module and run its pipeline on every change.
    Client(ClientArgs),

    /// Provision module repositories and serve them over git smart-HTTP.
    Host(HostArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Client(args) => args.run(cli.log_json),
        Commands::Host(args) => args.run(cli.log_json),
    }
}

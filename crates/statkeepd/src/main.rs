//! statkeepd — the statkeep daemon.
//!
//! One binary, two roles:
//! - `server`: the collector. Accepts metric updates over HTTP and keeps
//!   them in memory (with file snapshots) or in Postgres.
//! - `agent`: samples host metrics and reports them to a collector.
//!
//! # Usage
//!
//! ```text
//! statkeepd server --address 0.0.0.0:8080 --store-interval 300s
//! statkeepd agent --address localhost:8080 --poll-interval 2s
//! ```

mod agent_mode;
mod config;
mod server_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::{AgentArgs, FileConfig, ServerArgs};

#[derive(Parser)]
#[command(name = "statkeepd", about = "statkeep metrics collector and agent")]
struct Cli {
    /// TOML file supplying defaults for any flag not given.
    #[arg(long, global = true, env = "STATKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the collector server.
    Server(ServerArgs),
    /// Run the reporting agent.
    Agent(AgentArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    match cli.command {
        Command::Server(args) => server_mode::run(args.resolve(file.server)?).await,
        Command::Agent(args) => agent_mode::run(args.resolve(file.agent)?).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,statkeepd=debug,statkeep=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "reaper")]
#[command(version, about = "Dependency-aware bulk record deletion")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Maximum passes per run. Overrides reaper.toml and REAPER_LOOP_BUDGET.
    #[arg(long, global = true)]
    pub loop_budget: Option<u32>,

    /// Concurrent deletes per pass. Overrides reaper.toml and REAPER_MAX_PARALLEL.
    #[arg(long, global = true)]
    pub max_parallel: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a reaper project in the current directory
    Init,
    /// Fill the local record store with linked sample records
    Seed {
        /// Seed every stage of this chain
        #[arg(long, conflicts_with = "record_type")]
        chain: Option<String>,

        /// Records per chain stage
        #[arg(long, default_value = "3")]
        per_stage: usize,

        /// Seed unlinked records of a single type
        #[arg(long = "type", value_name = "TYPE")]
        record_type: Option<String>,

        /// Number of records for --type
        #[arg(long, default_value = "10")]
        count: usize,
    },
    /// Delete records: sweep a chain, a whole record type, or explicit ids
    Run {
        /// Chain to sweep (e.g. O2C, P2P)
        #[arg(conflicts_with_all = ["delete_all", "ids"])]
        chain: Option<String>,

        /// Delete every record of this type
        #[arg(long, value_name = "TYPE", conflicts_with = "ids")]
        delete_all: Option<String>,

        /// Record type of --ids
        #[arg(long = "type", value_name = "TYPE", requires = "ids")]
        record_type: Option<String>,

        /// Comma-separated record ids
        #[arg(long, value_delimiter = ',', requires = "record_type")]
        ids: Vec<i64>,

        /// UI output mode: full, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// List registered chains and their stages
    Chains,
    /// List record types eligible for deletion
    Types,
    /// Show the newest records of a type
    Preview {
        #[arg(value_name = "TYPE")]
        record_type: String,

        /// Maximum records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show recent runs from the ledger and sent notifications
    Status {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default reaper.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let _log_guard = cmd::init_logging(&cli, &project_dir)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Seed {
            chain,
            per_stage,
            record_type,
            count,
        } => cmd::cmd_seed(
            &cli,
            &project_dir,
            chain.as_deref(),
            *per_stage,
            record_type.as_deref(),
            *count,
        )?,
        Commands::Run {
            chain,
            delete_all,
            record_type,
            ids,
            ui,
        } => {
            let request = cmd::build_request(
                chain.as_deref(),
                delete_all.as_deref(),
                record_type.as_deref(),
                ids,
            )?;
            cmd::cmd_run(&cli, project_dir, request, ui).await?;
        }
        Commands::Chains => cmd::cmd_chains(&cli, &project_dir)?,
        Commands::Types => cmd::cmd_types(&cli, &project_dir).await?,
        Commands::Preview { record_type, limit } => {
            cmd::cmd_preview(&cli, &project_dir, record_type, *limit).await?
        }
        Commands::Status { limit } => cmd::cmd_status(&project_dir, *limit)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}

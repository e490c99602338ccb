use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "talio")]
#[command(version, about = "Shared kanban board server")]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding `.talio/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the board server
    Serve {
        /// Port to listen on. Overrides talio.toml and TALIO_PORT.
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database path. Overrides talio.toml and TALIO_DB_PATH.
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Permissive CORS, listening on all interfaces
        #[arg(long)]
        dev: bool,

        /// Create the database and exit
        #[arg(long)]
        init: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Check talio.toml for problems
    Validate,
    /// Write a default talio.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Serve {
            port,
            db_path,
            dev,
            init,
        } => {
            let config = talio::config::TalioConfig::with_cli_args(
                project_dir,
                *port,
                db_path.clone(),
                *dev,
                cli.verbose,
            )?;
            cmd::cmd_serve(&config, *init).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}

pub mod archive;
pub mod live;
pub mod report;

use std::path::PathBuf;

use anyhow::Result;
use archive::{process_archive_command, ArchiveCommand};
use clap::{Parser, Subcommand};
use live::{process_live_command, LiveCommand};
use tracing::debug;

use crate::utils::{dir::create_application_default_path, logging::enable_logging};

#[derive(Parser, Debug)]
#[command(name = "playtally", version, long_about = None)]
#[command(about = "Counts songs listened to per day", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable verbose logging, also printed to the console")]
    log: bool,
    #[arg(
        long,
        help = "Directory for logs. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(about = "Count plays per day of a year from exported streaming history files")]
    Archive {
        #[command(flatten)]
        command: ArchiveCommand,
    },
    #[command(
        about = "Count recent plays per day using the streaming service API, estimating days without history"
    )]
    Live {
        #[command(flatten)]
        command: LiveCommand,
    },
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let app_dir = args.dir.map_or_else(create_application_default_path, Ok)?;
    enable_logging(&app_dir, args.log)?;

    if dotenv::dotenv().is_ok() {
        debug!("Loaded environment from .env");
    }

    match args.commands {
        Commands::Archive { command } => process_archive_command(command).await,
        Commands::Live { command } => process_live_command(command).await,
    }
}

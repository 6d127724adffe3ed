//! texfetch CLI - command-line front end for the image fetch pipeline.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use texfetch::ImageId;

use commands::cache::CacheAction;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "texfetch")]
#[command(version = texfetch::VERSION)]
#[command(about = "Fetch and decode images through the texfetch pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one image from the cache or an HTTP URL and decode it
    Fetch {
        /// Image identity (UUID)
        #[arg(long)]
        id: ImageId,

        /// HTTP URL serving the compressed image
        #[arg(long)]
        url: Option<String>,

        /// Discard level to decode at (0 = full resolution, max 5)
        #[arg(long, default_value = "0")]
        discard: u8,

        /// Request priority
        #[arg(long, default_value = "1.0")]
        priority: f32,

        /// Also decode the auxiliary (alpha) channel
        #[arg(long)]
        aux: bool,

        /// Write the decoded image to this PNG file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Seconds to wait for the result
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Bypass the disk cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Disk cache management
    Cache {
        #[command(subcommand)]
        action: CacheAction,

        /// Cache directory (default: from config)
        #[arg(long, global = true)]
        dir: Option<PathBuf>,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli.command) {
        e.exit();
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Fetch {
            id,
            url,
            discard,
            priority,
            aux,
            output,
            timeout,
            no_cache,
        } => commands::fetch::run(FetchArgs {
            id,
            url,
            discard,
            priority,
            aux,
            output,
            timeout: Duration::from_secs(timeout),
            no_cache,
        }),
        Commands::Cache { action, dir } => commands::cache::run(action, dir),
        Commands::Config { command } => commands::config::run(command),
    }
}

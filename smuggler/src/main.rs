use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;

mod commands;
mod config;
mod pager;
mod transport;

use config::{normalize_url, ExportSpec, TransferConfig};
use transport::HttpStore;

#[derive(Parser)]
#[command(name = "smuggler")]
#[command(about = "Document store import/export utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore a dump file into a live instance
    In {
        /// Base URL of the target instance, e.g. http://localhost:8080/
        url: String,
        /// Dump file to read
        file: PathBuf,
        /// Consume the index section without writing any index
        #[arg(long)]
        skip_indexes: bool,
    },
    /// Export a live instance into a dump file
    ///
    /// The scan takes no snapshot: run it against a quiescent instance for
    /// an exact copy.
    Out {
        /// Base URL of the source instance
        url: String,
        /// Dump file to write
        file: PathBuf,
        /// Export only index definitions
        #[arg(long)]
        only_indexes: bool,
        /// Also export attachments
        #[arg(long)]
        include_attachments: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    let config = TransferConfig::default();
    match cli.command {
        Commands::In {
            url,
            file,
            skip_indexes,
        } => {
            let url = normalize_url(&url)?;
            let store = HttpStore::new(url);
            commands::import::run(&file, &store, &config, skip_indexes)?;
        }
        Commands::Out {
            url,
            file,
            only_indexes,
            include_attachments,
        } => {
            let spec = ExportSpec::new(&url, file, only_indexes, include_attachments)?;
            let store = HttpStore::new(spec.url.clone());
            commands::export::run(&spec, &store, &config)?;
        }
    }
    Ok(())
}

use std::env::consts::{ARCH, EXE_SUFFIX, FAMILY, OS};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::trace;

use weibo_album_downloader::engine::{init_config, init_logger};

use crate::program::Program;

mod program;
mod tui;

/// Download every photo and motion-photo clip of a Weibo account's album
#[derive(Parser, Debug, Clone)]
#[command(
    name = "weibo-album-dl",
    version,
    about = "Download every photo and motion-photo clip of a Weibo account's album",
    after_help = "CONTROLS (type while running, then press Enter):\n    \
        p    pause or resume\n    \
        s    stop after the current downloads\n\n\
        EXAMPLES:\n    \
        weibo-album-dl 1234567890\n    \
        weibo-album-dl https://weibo.com/u/1234567890?tabtype=album -o ./albums --order asc"
)]
pub(crate) struct Cli {
    /// Numeric account id or album URL (https://weibo.com/u/{id})
    #[arg(value_name = "ACCOUNT")]
    pub(crate) account: String,

    /// Directory holding config.toml
    #[arg(long, default_value = "config", value_name = "DIR")]
    pub(crate) config_dir: PathBuf,

    /// Root directory for downloads (overrides the config)
    #[arg(short, long, value_name = "DIR")]
    pub(crate) output: Option<PathBuf>,

    /// Download order
    #[arg(long, value_name = "ORDER", value_parser = ["asc", "reverse"])]
    pub(crate) order: Option<String>,

    /// Shortest wait between listing pages, in milliseconds
    #[arg(long, value_name = "MS")]
    pub(crate) min_interval: Option<u64>,

    /// Longest wait between listing pages, in milliseconds
    #[arg(long, value_name = "MS")]
    pub(crate) max_interval: Option<u64>,

    /// Number of parallel downloads
    #[arg(short = 'c', long, value_name = "NUM")]
    pub(crate) concurrency: Option<usize>,

    /// Store the given order and intervals in config.toml
    #[arg(long)]
    pub(crate) save_settings: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = init_config(&cli.config_dir)
        .with_context(|| format!("Failed to load config from {}", cli.config_dir.display()))?;
    let app_config = config_manager.get_app_config();

    // Held until exit so buffered log lines are flushed.
    let _log_guard = init_logger(&app_config.logging, Path::new(&app_config.paths.log_directory))
        .context("Failed to initialize logging")?;
    log_system_information();

    Program::new(cli, config_manager).run().await
}

/// Logs important information about the system being used.
fn log_system_information() {
    trace!("Printing system information out into log for debug purposes...");
    trace!("ARCH:           \"{}\"", ARCH);
    trace!("EXE_SUFFIX:     \"{}\"", EXE_SUFFIX);
    trace!("FAMILY:         \"{}\"", FAMILY);
    trace!("OS:             \"{}\"", OS);
}

//! Structured logging setup
//!
//! Everything goes through `tracing`. A daily rolling file receives the full
//! event stream in JSON or line format, while the terminal only shows
//! warnings so it does not fight with the progress bar.

use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::ChronoUtc},
    prelude::*,
    EnvFilter,
};

use crate::engine::config_loader::Logging;

/// Error types for logging
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type for logging operations
pub type LoggerResult<T> = Result<T, LoggerError>;

pub const LOG_FILE_NAME: &str = "weibo_album_downloader.log";

/// Initialize the global subscriber.
///
/// The returned guard flushes the file writer on drop and has to be kept
/// alive for as long as the program runs.
pub fn init_logger(logging: &Logging, log_dir: &Path) -> LoggerResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.log_level))
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    let terminal_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(LevelFilter::WARN);

    let (file_layer, guard) = if logging.log_to_file {
        std::fs::create_dir_all(log_dir)?;
        let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let layer = match logging.log_format.as_str() {
            "json" => fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_timer(ChronoUtc::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
            _ => fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking)
                .with_timer(ChronoUtc::rfc_3339())
                .with_span_events(FmtSpan::CLOSE)
                .boxed(),
        };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(terminal_layer)
        .try_init()
        .map_err(|e| LoggerError::Logging(e.to_string()))?;

    info!(
        log_format = logging.log_format.as_str(),
        log_level = logging.log_level.as_str(),
        log_to_file = logging.log_to_file,
        "Logger initialized"
    );

    Ok(guard)
}

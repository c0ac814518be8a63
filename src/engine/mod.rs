//! Download engine for the album downloader
//! Contains configuration, logging and the run machinery

pub mod config_loader;
pub mod destination;
pub mod download_engine;
pub mod logger;
pub mod orchestration;
pub mod producer;
pub mod rate_limiter;
pub mod run_state;
pub mod task;

#[cfg(test)]
mod test_support;

// Re-export commonly used types for convenience
pub use config_loader::{
    AppConfig, ConfigError, ConfigManager, ConfigResult, DownloadOrder, Settings,
    init_config, is_valid_interval_range,
};

pub use logger::{LoggerError, LoggerResult, init_logger};

// Re-export orchestration functionality
pub use orchestration::{
    ControllerError, ControllerOptions, ControllerResult,
    RunController, RunOutcome, RunReport,
};

pub use run_state::{ProgressSnapshot, RunPhase};

pub use destination::{Destination, DestinationError, LocalDirectory};

pub use download_engine::{DownloadError, DownloadResult, RetryPolicy};

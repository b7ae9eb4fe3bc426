//! Logging initialization
//!
//! ## Environment Variables
//!
//! - `LOG_DESTINATION`: "console" (default) or "file"
//! - `LOG_DIR`: directory for log files (default: "./logs"), file destination only
//! - `LOG_FILE_PREFIX`: log file name prefix (default: "lottery"), file destination only
//! - `RUST_LOG`: filter directives (default: "lottery=info,tower_http=info")

use anyhow::{anyhow, Result};
use std::env;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "lottery=info,tower_http=info";

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Console,
    File { dir: String, prefix: String },
}

impl LogDestination {
    /// Read the destination from `LOG_DESTINATION`, `LOG_DIR` and `LOG_FILE_PREFIX`
    pub fn from_env() -> Self {
        Self::parse(
            env::var("LOG_DESTINATION").ok().as_deref(),
            env::var("LOG_DIR").ok(),
            env::var("LOG_FILE_PREFIX").ok(),
        )
    }

    fn parse(destination: Option<&str>, dir: Option<String>, prefix: Option<String>) -> Self {
        match destination.map(str::to_lowercase).as_deref() {
            Some("file") => LogDestination::File {
                dir: dir.unwrap_or_else(|| "./logs".to_string()),
                prefix: prefix.unwrap_or_else(|| "lottery".to_string()),
            },
            _ => LogDestination::Console,
        }
    }
}

/// Install the global tracing subscriber.
///
/// For file logging the returned guard flushes the background writer and
/// must be held for the lifetime of the process.
pub fn init_logging(destination: &LogDestination) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    match destination {
        LogDestination::Console => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stdout)
                        .with_ansi(true),
                )
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize console tracing subscriber: {}", e))?;

            info!("Logging to console (stdout)");
            Ok(None)
        }
        LogDestination::File { dir, prefix } => {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow!("Failed to create log directory '{}': {}", dir, e))?;

            let file_appender = rolling::daily(dir, prefix);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .try_init()
                .map_err(|e| anyhow!("Failed to initialize file tracing subscriber: {}", e))?;

            info!("Logging to daily rotating files in: {}/", dir);
            info!("Log file pattern: {}/{}.<YYYY-MM-DD>", dir, prefix);
            Ok(Some(guard))
        }
    }
}

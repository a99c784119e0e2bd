//! Log sink setup.
//!
//! `dev` logs human readable lines at debug level. `prod` logs JSON at info
//! level, both to stdout and to a daily file under `logs/`. `RUST_LOG`
//! overrides either default.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Datelike;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::ProxyError;

const LOG_DIR: &str = "logs";

/// Logging flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Human readable, verbose.
    Dev,
    /// JSON, to stdout and a file.
    Prod,
}

impl LogMode {
    /// Parses a mode name; unknown names fall back to [`LogMode::Dev`] and yield `false`.
    pub fn parse(mode: &str) -> (Self, bool) {
        match mode.trim().to_ascii_lowercase().as_str() {
            "prod" => (LogMode::Prod, true),
            "dev" | "" => (LogMode::Dev, true),
            _ => (LogMode::Dev, false),
        }
    }

    fn default_directive(self) -> &'static str {
        match self {
            LogMode::Dev => "debug",
            LogMode::Prod => "info",
        }
    }
}

/// Path of today's prod log file, `logs/<year>-<month>-<day>.json`.
fn log_file_path() -> PathBuf {
    let today = chrono::Local::now();
    PathBuf::from(LOG_DIR).join(format!(
        "{}-{}-{}.json",
        today.year(),
        today.month(),
        today.day()
    ))
}

/// Installs the process-wide subscriber for `mode`.
pub fn init(mode: &str) -> Result<LogMode, ProxyError> {
    let (log_mode, known) = LogMode::parse(mode);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_mode.default_directive()));

    let installed = match log_mode {
        LogMode::Dev => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init(),
        LogMode::Prod => {
            fs::create_dir_all(LOG_DIR)?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file_path())?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_ansi(false).with_writer(Arc::new(file)))
                .try_init()
        }
    };
    installed.map_err(|e| ProxyError::Telemetry(e.to_string()))?;

    if known {
        tracing::info!(mode = ?log_mode, "logger set");
    } else {
        tracing::warn!(mode, "unknown eb_go_lb_mode, default to dev");
    }
    Ok(log_mode)
}

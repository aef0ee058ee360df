//! Logging setup for CMake runs
//!
//! Everything goes through `tracing`. CMake invocations and timings are
//! logged at `info`/`debug`, trace-parser target dumps at `debug`, and raw
//! server-protocol frames at `debug` (outgoing) and `trace` (incoming).
//! Output goes to stderr unless a log file is configured, because stdout
//! carries the generated build description.

use std::env;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_VAR: &str = "CMAKE_INTEROP_LOG_FILE";
const LOG_UNIQUE_VAR: &str = "CMAKE_INTEROP_LOG_UNIQUE";
const LOG_JSON_VAR: &str = "CMAKE_INTEROP_LOG_JSON";

/// Where and how the converter logs
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. "info" or "cmake_interop::cmake::server=trace"
    pub level: String,
    /// Log file; stderr when unset
    pub file_path: Option<PathBuf>,
    /// One JSON object per event instead of human readable lines
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            json_format: false,
        }
    }
}

impl LogConfig {
    /// Read `RUST_LOG` and the `CMAKE_INTEROP_LOG_*` variables
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        // Several subprojects may be configured in parallel by the host build
        let unique = env::var(LOG_UNIQUE_VAR).unwrap_or_default() == "true";
        let file_path = env::var(LOG_FILE_VAR).ok().map(|path| {
            let path = PathBuf::from(path);
            if unique {
                with_pid_suffix(&path, std::process::id())
            } else {
                path
            }
        });

        Self {
            level,
            file_path,
            json_format: env::var(LOG_JSON_VAR).unwrap_or_default() == "true",
        }
    }

    /// Apply `--log-level` and `--log-file`
    pub fn with_overrides(mut self, level: Option<String>, file_path: Option<PathBuf>) -> Self {
        if let Some(level) = level {
            self.level = level;
        }
        if let Some(file_path) = file_path {
            self.file_path = Some(file_path);
        }
        self
    }
}

/// `cmake.log` -> `cmake.<pid>.log`, `cmake` -> `cmake.<pid>`
fn with_pid_suffix(path: &Path, pid: u32) -> PathBuf {
    let Some(stem) = path.file_stem() else {
        return path.to_path_buf();
    };

    let file_name = match path.extension() {
        Some(ext) => format!("{}.{pid}.{}", stem.to_string_lossy(), ext.to_string_lossy()),
        None => format!("{}.{pid}", stem.to_string_lossy()),
    };
    path.with_file_name(file_name)
}

fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_new(&config.level).or_else(|_| EnvFilter::try_new("info"))?;
    let subscriber = tracing_subscriber::registry().with(env_filter);

    match (&config.file_path, config.json_format) {
        (Some(file_path), true) => {
            let file = open_log_file(file_path)?;
            subscriber
                .with(fmt::layer().json().with_writer(file).with_ansi(false))
                .init();
        }
        (Some(file_path), false) => {
            let file = open_log_file(file_path)?;
            subscriber
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init();
        }
        (None, true) => {
            subscriber
                .with(fmt::layer().json().with_writer(io::stderr).with_ansi(false))
                .init();
        }
        (None, false) => {
            subscriber
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(true)
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init();
        }
    }

    Ok(())
}

/// Log one CMake server frame as a single structured event
///
/// `$direction` is "outgoing" or "incoming", `$kind` the frame `type`.
#[macro_export]
macro_rules! log_server_message {
    ($level:expr, $direction:expr, $kind:expr, $data:expr) => {
        tracing::event!(
            $level,
            direction = $direction,
            kind = $kind,
            data = ?$data,
            pid = std::process::id(),
            "CMake server message"
        );
    };
}

/// Log the duration of a CMake call or analysis pass
#[macro_export]
macro_rules! log_timing {
    ($level:expr, $operation:expr, $duration:expr) => {
        tracing::event!(
            $level,
            operation = $operation,
            duration_ms = $duration.as_millis(),
            pid = std::process::id(),
            "CMake timing"
        );
    };
}

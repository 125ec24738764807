//! Process-wide logging bootstrap.
//!
//! # Responsibility
//! - Initialize the logging backend exactly once per process.
//! - Emit stable, metadata-only `event=…` diagnostic lines from core.
//!
//! # Invariants
//! - Initialization is idempotent for the same configuration.
//! - Re-initialization with a conflicting configuration is rejected.
//! - Initialization never panics.

use crate::config::LogConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, FlexiLoggerError, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "roster";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;
const MAX_LOG_FILES: usize = 5;
const MAX_PANIC_PAYLOAD_CHARS: usize = 160;

static LOGGING_STATE: OnceCell<LoggingState> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

struct LoggingState {
    level: &'static str,
    dir: Option<PathBuf>,
    _logger: LoggerHandle,
}

#[derive(Debug)]
pub enum LogError {
    UnsupportedLevel {
        level: String,
    },
    AlreadyInitialized {
        active_level: &'static str,
        active_dir: Option<PathBuf>,
    },
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },
    Backend(FlexiLoggerError),
}

impl Display for LogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnsupportedLevel { level } => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::AlreadyInitialized {
                active_level,
                active_dir,
            } => match active_dir {
                Some(dir) => write!(
                    f,
                    "logging already initialized (level={active_level}, dir={}); refusing to reconfigure",
                    dir.display()
                ),
                None => write!(
                    f,
                    "logging already initialized (level={active_level}, sink=stderr); refusing to reconfigure"
                ),
            },
            Self::CreateDir { dir, source } => write!(
                f,
                "failed to create log directory `{}`: {source}",
                dir.display()
            ),
            Self::Backend(err) => write!(f, "failed to start logger: {err}"),
        }
    }
}

impl Error for LogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

/// Initializes logging from the given configuration.
///
/// Repeated calls with an equivalent configuration succeed without touching
/// the already-running backend.
///
/// # Errors
/// - [`LogError::UnsupportedLevel`] when the level string is unknown.
/// - [`LogError::AlreadyInitialized`] when logging is active with a
///   different level or sink.
/// - [`LogError::CreateDir`] / [`LogError::Backend`] on sink setup failure.
pub fn init_logging(config: &LogConfig) -> Result<(), LogError> {
    let level = normalize_level(&config.level)?;

    let state = LOGGING_STATE.get_or_try_init(|| start_backend(level, config.dir.as_deref()))?;

    if state.level != level || state.dir.as_deref() != config.dir.as_deref() {
        return Err(LogError::AlreadyInitialized {
            active_level: state.level,
            active_dir: state.dir.clone(),
        });
    }

    Ok(())
}

fn start_backend(level: &'static str, dir: Option<&Path>) -> Result<LoggingState, LogError> {
    let builder = Logger::try_with_str(level).map_err(LogError::Backend)?;

    let logger = match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| LogError::CreateDir {
                dir: dir.to_path_buf(),
                source,
            })?;
            builder
                .log_to_file(
                    FileSpec::default()
                        .directory(dir)
                        .basename(LOG_FILE_BASENAME),
                )
                .rotate(
                    Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(MAX_LOG_FILES),
                )
                .write_mode(WriteMode::BufferAndFlush)
                .append()
                .format_for_files(flexi_logger::detailed_format)
                .start()
                .map_err(LogError::Backend)?
        }
        None => builder
            .log_to_stderr()
            .format_for_stderr(flexi_logger::detailed_format)
            .start()
            .map_err(LogError::Backend)?,
    };

    install_panic_hook_once();

    info!(
        "event=logging_init module=core status=ok level={} sink={} version={}",
        level,
        dir.map_or_else(|| "stderr".to_string(), |d| d.display().to_string()),
        env!("CARGO_PKG_VERSION")
    );

    Ok(LoggingState {
        level,
        dir: dir.map(Path::to_path_buf),
        _logger: logger,
    })
}

/// Returns the default log level for the current build mode.
///
/// - `debug` builds -> `debug`
/// - `release` builds -> `info`
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

fn normalize_level(level: &str) -> Result<&'static str, LogError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LogError::UnsupportedLevel {
            level: other.to_string(),
        }),
    }
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "event=panic_captured module=core status=error location={} payload={}",
            location,
            panic_summary(panic_info)
        );
        previous_hook(panic_info);
    }));
}

fn panic_summary(info: &std::panic::PanicHookInfo<'_>) -> String {
    // Panic payloads can carry user-controlled text; strip newlines and cap
    // length before the message reaches the log stream.
    let payload = if let Some(message) = info.payload().downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    };

    let normalized = payload.replace(['\n', '\r'], " ");
    let mut truncated = normalized.chars().take(MAX_PANIC_PAYLOAD_CHARS).collect::<String>();
    if normalized.chars().count() > MAX_PANIC_PAYLOAD_CHARS {
        truncated.push_str("...");
    }
    truncated
}

use std::fs;

use camino::Utf8Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

use crate::error::SyncError;

pub const DEBUG_LOG: &str = "debug.log";
pub const ERROR_LOG: &str = "error.log";

const CRATE_TARGET: &str = "seqrun_sync";

/// Installs the global subscriber: stderr filtered by `RUST_LOG` (default
/// `info`), plus append-only `debug.log` and `error.log` under `log_dir`.
///
/// `debug.log` holds this crate's debug events; HTTP and TLS libraries only
/// reach it at warn and above.
pub fn init(log_dir: &Utf8Path) -> Result<(), SyncError> {
    fs::create_dir_all(log_dir.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("{log_dir}: {err}")))?;

    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(log_file(log_dir, DEBUG_LOG)?)
        .with_filter(
            Targets::new()
                .with_target(CRATE_TARGET, LevelFilter::DEBUG)
                .with_default(LevelFilter::WARN),
        );

    let error_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(log_file(log_dir, ERROR_LOG)?)
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(debug_layer)
        .with(error_layer)
        .try_init()
        .map_err(|err| SyncError::Filesystem(format!("failed to install logger: {err}")))
}

fn log_file(log_dir: &Utf8Path, file_name: &str) -> Result<RollingFileAppender, SyncError> {
    let (prefix, suffix) = file_name.rsplit_once('.').unwrap_or((file_name, ""));
    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(prefix);
    if !suffix.is_empty() {
        builder = builder.filename_suffix(suffix);
    }
    builder
        .build(log_dir)
        .map_err(|err| SyncError::Filesystem(format!("{log_dir}/{file_name}: {err}")))
}

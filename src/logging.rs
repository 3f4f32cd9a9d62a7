//! Console and debug-file logging.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::PersistLogs;
use crate::entries::sanitize_filename;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogLevel {
    Quiet,
    #[default]
    Info,
    Verbose,
    Debug,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Quiet => "warn",
            LogLevel::Info => "info",
            LogLevel::Verbose => "debug",
            LogLevel::Debug => "trace",
        }
    }
}

/// Keeps the debug-file writer alive; dropping it flushes the file.
#[derive(Debug)]
pub struct LogHandle {
    debug_log: PathBuf,
    _guard: WorkerGuard,
}

impl LogHandle {
    pub fn debug_log_path(&self) -> &Path {
        &self.debug_log
    }
}

/// Installs the global subscriber. `RUST_LOG` replaces the console level when set.
pub fn init(level: LogLevel) -> Result<LogHandle> {
    let console_filter = match env::var("RUST_LOG") {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives)
            .context("parsing RUST_LOG")?,
        _ => EnvFilter::new(format!("warn,ytdl_sub={}", level.directive())),
    };

    let directory = env::temp_dir();
    let file_name = format!(
        "ytdl-sub.{}.{}.log",
        Local::now().format("%Y-%m-%d-%H%M%S"),
        std::process::id()
    );
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
        &directory,
        &file_name,
    ));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug")),
        )
        .try_init()
        .context("installing the log subscriber")?;

    Ok(LogHandle {
        debug_log: directory.join(file_name),
        _guard: guard,
    })
}

pub fn persisted_log_name(now: NaiveDateTime, subscription: &str, success: bool) -> String {
    format!(
        "{}.{}.{}.log",
        now.format("%Y-%m-%d-%H%M%S"),
        sanitize_filename(subscription),
        if success { "success" } else { "error" }
    )
}

/// Copies the debug log into `logs_directory` once a subscription finishes.
/// Successful runs are skipped unless `keep_successful_logs` is set.
pub fn persist_log(
    debug_log: &Path,
    persist: &PersistLogs,
    subscription: &str,
    success: bool,
    now: NaiveDateTime,
) -> Result<Option<PathBuf>> {
    if success && !persist.keep_successful_logs {
        return Ok(None);
    }
    fs::create_dir_all(&persist.logs_directory)
        .with_context(|| format!("creating {}", persist.logs_directory.display()))?;
    let target = persist
        .logs_directory
        .join(persisted_log_name(now, subscription, success));
    if debug_log.exists() {
        fs::copy(debug_log, &target).with_context(|| {
            format!("copying {} to {}", debug_log.display(), target.display())
        })?;
    } else {
        fs::write(&target, b"")
            .with_context(|| format!("writing {}", target.display()))?;
    }
    Ok(Some(target))
}

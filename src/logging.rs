//! Tracing setup for the CLI.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! `RUST_LOG` overrides the configured level. With `[logging] file = true`
//! a daily rolling file is written under `.reaper/logs/` as well.

use crate::reaper_config::{LogFormat, LoggingSection};
use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub const LOG_FILE_PREFIX: &str = "reaper.log";

/// Build the filter: `RUST_LOG` if set, otherwise the configured level, with
/// `--verbose` raising reaper's own targets to debug.
pub fn env_filter(level: &str, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let directive = if verbose {
        format!("{},reaper=debug", level)
    } else {
        level.to_string()
    };
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the life of the process.
pub fn init(
    settings: &LoggingSection,
    log_dir: Option<&Path>,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    let console = match settings.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer().with_writer(std::io::stderr).json().boxed(),
    };

    let (file, guard) = match log_dir {
        Some(dir) if settings.file => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter(&settings.level, verbose))
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_falls_back_to_info() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = env_filter("reaper=loudest", false);
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_verbose_adds_crate_directive() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let filter = env_filter("warn", true);
        assert!(filter.to_string().contains("reaper=debug"));
    }
}

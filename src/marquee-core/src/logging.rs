use crate::{config::LoggingConfig, paths::AppDirs};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILE: &str = "marquee.log";

/// Keeps the background file writer alive; drop it last.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_logging(config: &LoggingConfig, dirs: &AppDirs) -> Result<LoggingGuard, LoggingError> {
    let directive = config.level.as_filter_directive();
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.trim().is_empty() => EnvFilter::try_new(from_env),
        _ => EnvFilter::try_new(directive),
    }
    .map_err(|source| LoggingError::ParseLevel {
        level: directive.to_string(),
        source,
    })?;

    let (file_writer, file_guard) = if config.file {
        let log_dir = dirs.log_dir().to_path_buf();
        fs::create_dir_all(&log_dir).map_err(|source| LoggingError::CreateDirectory {
            path: log_dir.clone(),
            source,
        })?;
        let (writer, guard) = build_file_writer(config, &log_dir)?;
        (Some(writer), Some(guard))
    } else {
        (None, None)
    };

    let writer: BoxMakeWriter = match (config.stdout, file_writer) {
        (true, Some(file)) => BoxMakeWriter::new(
            std::io::stdout
                .with_max_level(tracing::Level::TRACE)
                .and(file),
        ),
        (false, Some(file)) => BoxMakeWriter::new(file),
        // stderr keeps stdout free for command output when files are off
        (true, None) => BoxMakeWriter::new(std::io::stdout),
        (false, None) => BoxMakeWriter::new(std::io::stderr),
    };

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(config.stdout)
        .with_writer(writer)
        .try_init()
        .map_err(LoggingError::SubscriberInstall)?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

fn build_file_writer(
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let file_stem = config.file_name.as_deref().unwrap_or(DEFAULT_LOG_FILE);
    prune_logs(log_dir, file_stem, config.max_log_files.max(1))?;

    let appender = tracing_appender::rolling::daily(log_dir, file_stem);
    Ok(tracing_appender::non_blocking(appender))
}

/// Removes the oldest rolled files so that at most `keep` remain.
fn prune_logs(dir: &Path, file_stem: &str, keep: usize) -> Result<Vec<PathBuf>, LoggingError> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .map_err(|source| LoggingError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(file_stem))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((entry.path(), modified))
        })
        .collect();

    if entries.len() <= keep {
        return Ok(Vec::new());
    }

    entries.sort_by_key(|(_, modified)| *modified);
    let excess = entries.len() - keep;
    let mut removed = Vec::with_capacity(excess);
    for (path, _) in entries.into_iter().take(excess) {
        fs::remove_file(&path).map_err(|source| LoggingError::Cleanup {
            path: path.clone(),
            source,
        })?;
        removed.push(path);
    }
    Ok(removed)
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse log level {level}: {source}")]
    ParseLevel {
        level: String,
        source: tracing_subscriber::filter::ParseError,
    },
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInstall(Box<dyn std::error::Error + Send + Sync>),
    #[error("failed to list log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove old log file {path}: {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn filter_directive_is_lowercase() {
        assert_eq!(LogLevel::Warn.as_filter_directive(), "warn");
    }

    #[test]
    fn prune_keeps_newest_files() {
        let dir = tempdir().unwrap();
        for name in ["marquee.log.1", "marquee.log.2", "marquee.log.3", "other.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }

        let removed = prune_logs(dir.path(), "marquee.log", 2).unwrap();
        assert_eq!(removed, vec![dir.path().join("marquee.log.1")]);
        assert!(dir.path().join("other.txt").exists());
        assert!(dir.path().join("marquee.log.3").exists());
    }
}

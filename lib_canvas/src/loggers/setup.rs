//! # Logging Setup
//!
//! Console output for operators plus a JSON file per day for machines.
//!
//! The file layer goes through a `tracing-appender` non-blocking writer. The
//! returned [`WorkerGuard`] flushes that writer when dropped, so `main` must
//! hold it until the process exits.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::NaiveDate;
use tracing::{info, warn};
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber for `app`, writing JSON lines to
/// `<log_dir>/<app>.YYYY-MM-DD`.
///
/// `RUST_LOG` wins over `level` when it is set and valid.
pub fn setup_logging(app: &str, log_dir: &Path, level: &str) -> anyhow::Result<WorkerGuard> {
    fs::create_dir_all(log_dir).with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let pruned = cleanup_old_logs(log_dir, app)?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, app));

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level `{level}`"))?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(writer).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    info!(app, level, log_dir = %log_dir.display(), pruned, "logging initialized");
    Ok(guard)
}

/// Deletes every dated log file of `app` in `log_dir` except the newest.
/// Files whose suffix is not a `YYYY-MM-DD` date are left alone.
///
/// Returns how many files were removed.
pub fn cleanup_old_logs(log_dir: &Path, app: &str) -> anyhow::Result<usize> {
    let pattern = format!("{}/{}.*", log_dir.display(), app);
    let mut dated: Vec<(NaiveDate, PathBuf)> = glob::glob(&pattern)
        .with_context(|| format!("bad log file pattern {pattern}"))?
        .filter_map(Result::ok)
        .filter_map(|path| log_date(&path, app).map(|date| (date, path)))
        .collect();

    dated.sort_by(|a, b| b.0.cmp(&a.0));

    let mut removed = 0;
    for (_, path) in dated.iter().skip(1) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete old log file"),
        }
    }
    Ok(removed)
}

fn log_date(path: &Path, app: &str) -> Option<NaiveDate> {
    let name = path.file_name()?.to_str()?;
    let suffix = name.strip_prefix(app)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"{}\n").unwrap();
    }

    #[test]
    fn test_cleanup_keeps_newest_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "server_canvas.2026-01-02");
        touch(dir.path(), "server_canvas.2026-01-10");
        touch(dir.path(), "server_canvas.2025-12-31");
        touch(dir.path(), "server_canvas.notes");
        touch(dir.path(), "other_app.2020-01-01");

        let removed = cleanup_old_logs(dir.path(), "server_canvas").unwrap();
        assert_eq!(removed, 2);

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["other_app.2020-01-01", "server_canvas.2026-01-10", "server_canvas.notes"]);
    }

    #[test]
    fn test_cleanup_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(cleanup_old_logs(dir.path(), "server_canvas").unwrap(), 0);
    }

    #[test]
    fn test_log_date_requires_exact_prefix() {
        assert_eq!(
            log_date(Path::new("/tmp/app.2026-03-04"), "app"),
            NaiveDate::from_ymd_opt(2026, 3, 4)
        );
        assert_eq!(log_date(Path::new("/tmp/app2.2026-03-04"), "app"), None);
        assert_eq!(log_date(Path::new("/tmp/app.2026-13-04"), "app"), None);
    }
}

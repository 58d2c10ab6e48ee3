//! Subscriber setup for binaries and tests that embed the pool
//!
//! The pool only emits `tracing` events and spans. [`install`] routes them to
//! stderr, to daily-rotated JSON files, or both. `RUST_LOG` takes precedence
//! over [`LogSettings::filter`].

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "tidepool.log";

/// Where pool logs go and how verbose they are
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LogSettings {
    /// Filter directives used when `RUST_LOG` is unset
    pub filter: String,
    /// Human-readable output on stderr
    pub console: bool,
    /// Directory for daily-rotated JSON logs
    pub json_dir: Option<PathBuf>,
    /// Emit span open/close events for instrumented pool operations
    pub span_events: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info,tidepool_pool=debug".to_string(),
            console: true,
            json_dir: None,
            span_events: false,
        }
    }
}

impl LogSettings {
    /// Console output only, with the given filter
    pub fn console(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            ..Self::default()
        }
    }

    /// JSON files under the platform data directory, nothing on stderr
    pub fn service() -> Self {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tidepool")
            .join("logs");
        Self {
            filter: "warn,tidepool_pool=info".to_string(),
            console: false,
            json_dir: Some(dir),
            span_events: false,
        }
    }
}

/// Keeps the JSON file writer alive; buffered lines are flushed on drop
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _writer: Option<WorkerGuard>,
}

/// Install the global subscriber
///
/// Fails if the log directory cannot be created or a global subscriber is
/// already set.
pub fn install(settings: &LogSettings) -> anyhow::Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.filter))
        .with_context(|| format!("invalid log filter {:?}", settings.filter))?;
    let spans = if settings.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let console = settings.console.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(spans.clone())
    });

    let (json, writer) = match &settings.json_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(
                tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX),
            );
            let layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_events(spans)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::debug!(console = settings.console, json_dir = ?settings.json_dir, "logging installed");
    Ok(LogGuard { _writer: writer })
}

/// Route logs through the test harness's captured output
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tidepool_pool=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_settings_log_to_files_only() {
        let settings = LogSettings::service();
        assert!(!settings.console);
        assert!(
            settings
                .json_dir
                .as_ref()
                .is_some_and(|dir| dir.ends_with("tidepool/logs"))
        );
    }

    #[test]
    fn test_settings_from_json() {
        let settings: LogSettings =
            serde_json::from_str(r#"{"console": false, "jsonDir": "/var/log/tidepool"}"#)
                .expect("parse");
        assert_eq!(settings.json_dir, Some(PathBuf::from("/var/log/tidepool")));
        assert!(!settings.console);
        assert_eq!(settings.filter, LogSettings::default().filter);
    }

    #[test]
    fn test_install_only_once() {
        let settings = LogSettings {
            console: false,
            ..LogSettings::console("debug")
        };

        let guard = install(&settings).expect("first install");
        let err = install(&settings).err().expect("second install fails");
        assert!(err.to_string().contains("already installed"));
        drop(guard);
    }
}

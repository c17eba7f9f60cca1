//! ---
//! rs_section: "01-core-functionality"
//! rs_subsection: "module"
//! rs_type: "source"
//! rs_scope: "code"
//! rs_description: "Tracing subscriber setup with stdout and rolling file sinks."
//! rs_version: "v0.1.0"
//! rs_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override read before `RUST_LOG`.
pub const LOG_ENV: &str = "REACTORSYNC_LOG";
/// Daemon output at `info`; HTTP plumbing only reports warnings.
const DEFAULT_DIRECTIVE: &str = "info,hyper=warn,tower_http=warn";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Stdout rendering selected by `[logging] format`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// One JSON object per event with fields such as `reactor_id` and `tick` at the top level.
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the global subscriber for `reactorsyncd`.
///
/// Stdout follows `config.format`. Every event is also written as JSON to
/// `<directory>/<prefix>.log.<date>`, rotated daily, where the prefix defaults
/// to the service name. Calling this twice keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = daily(&config.directory, format!("{prefix}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let filter = filter_from(
        std::env::var(LOG_ENV).ok(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    );

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .flatten_event(true)
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout_writer)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .flatten_event(true)
        .with_writer(file_writer)
        .boxed();

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        file_prefix = %prefix,
        format = ?config.format,
        installed,
        "tracing initialised"
    );
    Ok(())
}

/// `REACTORSYNC_LOG` wins over `RUST_LOG`; an unparsable override falls back to the default.
fn filter_from(override_directive: Option<String>, rust_log: Option<String>) -> EnvFilter {
    if let Some(directive) = override_directive {
        return EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive '{directive}' ({err}); using '{DEFAULT_DIRECTIVE}'");
            EnvFilter::new(DEFAULT_DIRECTIVE)
        });
    }
    rust_log
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn override_beats_rust_log() {
        let filter = filter_from(Some("debug".into()), Some("trace".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn rust_log_used_without_override() {
        let filter = filter_from(None, Some("warn".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn invalid_directives_fall_back_to_info() {
        let filter = filter_from(Some("reactorsync_core=loud".into()), None);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
        let filter = filter_from(None, Some("reactorsync_core=loud".into()));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn log_format_uses_kebab_case() {
        #[derive(Deserialize)]
        struct Section {
            format: LogFormat,
        }
        let section: Section = toml::from_str("format = \"structured-json\"").unwrap();
        assert_eq!(section.format, LogFormat::StructuredJson);
        let section: Section = toml::from_str("format = \"pretty\"").unwrap();
        assert_eq!(section.format, LogFormat::Pretty);
    }
}

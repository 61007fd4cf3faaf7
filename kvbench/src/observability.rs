//! Logging and error reporting setup.

use std::env;
use std::io::IsTerminal;

use secrecy::ExposeSecret;
use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Initializes Sentry if a DSN is configured.
///
/// The returned guard flushes pending events when dropped and must be kept alive for the whole
/// run.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let sentry_config = &config.sentry;
    let dsn = sentry_config.dsn.as_ref()?;

    Some(sentry::init(sentry::ClientOptions {
        dsn: dsn.expose_secret().as_str().parse().ok(),
        release: sentry::release_name!(),
        environment: sentry_config.environment.clone(),
        sample_rate: sentry_config.sample_rate,
        debug: sentry_config.debug,
        enable_logs: true,
        ..Default::default()
    }))
}

/// Installs the global tracing subscriber.
///
/// Log lines go to stderr in the configured format. If Sentry is enabled, warnings and errors are
/// additionally reported as events.
pub fn init_tracing(config: &Config) {
    // Same as the default filter, except it converts warnings into events
    // and also sends everything at or above INFO as logs instead of breadcrumbs.
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => {
                sentry_tracing::EventFilter::Event | sentry_tracing::EventFilter::Log
            }
            Level::INFO => sentry_tracing::EventFilter::Log,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let (level, env_filter) = parse_rust_log(config.logging.level);
    let format = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format = match resolve_format(config.logging.format) {
        LogFormat::Json => format
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .boxed(),
        LogFormat::Simplified => format.with_ansi(false).boxed(),
        LogFormat::Pretty | LogFormat::Auto => format.compact().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(level))
        .with(sentry_layer)
        .with(env_filter)
        .init();
}

fn resolve_format(format: LogFormat) -> LogFormat {
    match format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    }
}

/// Determines the log level and the per-crate filter.
///
/// A plain level in `RUST_LOG` overrides `default`. Any other value of `RUST_LOG` is used
/// literally as the filter.
pub fn parse_rust_log(default: LevelFilter) -> (LevelFilter, EnvFilter) {
    let level = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
        Err(_) => default,
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        aws_config=WARN,\
        aws_smithy_runtime=WARN,\
        hyper_util=WARN,\
        reqwest=WARN,\
        kvbench=TRACE,\
        kvbench_store=TRACE,\
        kvbench_types=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_formats_are_kept() {
        for format in [LogFormat::Pretty, LogFormat::Simplified, LogFormat::Json] {
            assert_eq!(resolve_format(format), format);
        }
        assert_ne!(resolve_format(LogFormat::Auto), LogFormat::Auto);
    }

    #[test]
    fn sentry_is_disabled_without_dsn() {
        assert!(init_sentry(&Config::default()).is_none());
    }
}

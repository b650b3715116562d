//! Tracing subscriber setup.
//!
//! `log` records emitted by the crate (and by dependencies) are bridged into
//! `tracing` so spans and plain log lines end up in the same output.

use std::sync::OnceLock;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` overrides `config.filter`.
///
/// Returns `true` when this call (or an earlier one) installed the
/// subscriber, `false` when another global subscriber was already present.
/// Calling it more than once is a no-op.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    *INSTALLED.get_or_init(|| install(config))
}

fn install(config: &LoggingConfig) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.json {
        tracing::subscriber::set_global_default(
            registry.with(tracing_subscriber::fmt::layer().json()),
        )
        .is_ok()
    } else {
        tracing::subscriber::set_global_default(registry.with(tracing_subscriber::fmt::layer()))
            .is_ok()
    };

    if installed {
        // Another logger may already own the `log` facade (e.g. a test harness).
        let _ = tracing_log::LogTracer::init();
        log::debug!(
            "Tracing initialized (filter: {}, json: {})",
            config.filter,
            config.json
        );
    }

    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        let first = init_tracing(&config);
        let second = init_tracing(&LoggingConfig {
            filter: "ocrflow=trace".to_string(),
            json: true,
        });
        assert_eq!(first, second);
    }
}

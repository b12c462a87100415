//! Tracing setup for the `signit` binary.

use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber. Later calls are ignored.
///
/// `verbose` lowers the default level to `debug`; `RUST_LOG` always wins.
pub fn init_tracing(json: bool, verbose: bool) {
    INIT.call_once(|| {
        let default = if verbose { "signit=debug" } else { DEFAULT_FILTER };
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry
                .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
                .init();
        }

        debug!(json, "tracing initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_ignored() {
        init_tracing(false, false);
        init_tracing(true, true);
        assert!(INIT.is_completed());
    }
}

//! Diagnostic logging for crashsift.
//!
//! Logs go to stderr so they never mix with the summary table or the
//! triage prompt on stdout. The level defaults to `info` and can be
//! changed through `RUST_LOG`.

use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Later calls are ignored.
pub fn init_tracing(json: bool) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter());
        let result = if json {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_current_span(true),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                )
                .try_init()
        };
        // Another subscriber (e.g. a test harness) may already be installed.
        if result.is_ok() {
            debug!(json, "tracing initialized");
        }
    });
}

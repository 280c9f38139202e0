//! Logging setup for docqa binaries and tests.
//!
//! Filtering follows `RUST_LOG` when set and falls back to the level passed
//! in. Initialization is idempotent: a second call leaves the first
//! subscriber in place.

mod capture;

pub use capture::{CapturedEvent, InMemoryEventLayer, SharedEventStorage};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Filter from `RUST_LOG`, or `default_level` when unset or invalid.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Human-readable logs on stderr.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_telemetry(service_name: &str, default_level: &str) -> bool {
    let layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(default_level));
    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    if installed {
        tracing::debug!(service.name = service_name, "telemetry initialized");
    }
    installed
}

/// One JSON object per event on stderr, for log shipping.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_json_telemetry(service_name: &str, default_level: &str) -> bool {
    let layer = tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter(default_level));
    let installed = tracing_subscriber::registry().with(layer).try_init().is_ok();
    if installed {
        tracing::debug!(service.name = service_name, "json telemetry initialized");
    }
    installed
}

/// Install a thread-local subscriber that records events into `storage`.
///
/// The subscriber stays active until the returned guard is dropped.
pub fn capture_events(storage: &SharedEventStorage) -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::registry()
        .with(InMemoryEventLayer::new(storage.clone()))
        .set_default()
}

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. sqlx logs every statement at
/// info, which would drown out the probe cadence.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initialize structured logging for the service.
///
/// Call once at startup, before anything logs.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Logging initialized");
}

//! Log output
//!
//! The library only emits `tracing` events. Hosts without their own
//! subscriber can install a formatted one here.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Filter used when neither the caller nor `RUST_LOG` says otherwise
pub const DEFAULT_FILTER: &str = "rtmp_push=info";

/// Install a fmt subscriber with the given filter directives
/// (`"rtmp_push=debug"`, `"warn,rtmp_push::session=trace"`, ...).
///
/// Fails if the directives do not parse or a global subscriber is already
/// installed.
pub fn init(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter)
        .map_err(|e| Error::InvalidArgument(format!("log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| Error::InvalidArgument(format!("logging: {}", e)))
}

/// [`init`] from `RUST_LOG`, falling back to [`DEFAULT_FILTER`]
pub fn init_from_env() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    init(&filter)
}

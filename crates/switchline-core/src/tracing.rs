//! Logging setup for the switchline binary.
//!
//! One call, two modes: the default pretty info-level output, or a
//! compact debug-level stream when the engine's `debug` flag is on.
//! `RUST_LOG` overrides either.

use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_tracing(debug: bool) -> Result<(), SetGlobalDefaultError> {
    let fallback = if debug {
        "switchline=debug"
    } else {
        "switchline=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    if debug {
        let subscriber = tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let subscriber = tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
    }
}

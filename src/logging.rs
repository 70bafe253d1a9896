//! Diagnostic tracing for the `pilot` binary.
//!
//! Diagnostics go to stderr and are controlled by `RUST_LOG`. The product
//! record of what the engine and sandbox did is the
//! [`ActivityLog`](crate::activity::ActivityLog), which is unaffected by the
//! filter.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`, or `info` when `verbose` is set.
pub fn init(verbose: bool) {
    let default = if verbose { "pilot=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

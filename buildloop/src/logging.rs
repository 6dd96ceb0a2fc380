//! Developer diagnostics for the build loop.
//!
//! Tracing output is controlled by `RUST_LOG` and goes to stderr. It is separate
//! from the product artifacts (`progress.txt`, `.buildloop/runs/`), which are
//! always written regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output: stderr, compact format.
///
/// ```bash
/// RUST_LOG=buildloop=info buildloop execute --agent-dir ../agent
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

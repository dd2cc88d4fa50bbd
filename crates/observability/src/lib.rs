//! Process-wide tracing setup.
//!
//! Records are emitted as JSON lines, filtered through `RUST_LOG`
//! (default `info`). Replay runs log their start date, skipped projectors and
//! per-projector failures; the Postgres adapters add one span per statement.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

/// Initialize tracing with the `RUST_LOG` filter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

/// Same as [`init`], with `directive` used when `RUST_LOG` is unset or invalid.
pub fn init_with_default(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_current_span(true)
        .try_init();
}

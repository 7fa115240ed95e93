//! Tracing subscriber setup for the `vakil` binary.
//!
//! Events go to stderr so command output on stdout stays clean. The filter
//! comes from `RUST_LOG` when set, otherwise `default_directive`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Default filter: info for this crate, warnings for everything else.
pub const DEFAULT_DIRECTIVE: &str = "warn,vakil=info";

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .try_init();
}

//! Tracing subscriber setup

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `retrace=info`, or `retrace=debug`
/// when `verbose` is true. Calling this more than once is harmless.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose { "retrace=debug" } else { "retrace=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

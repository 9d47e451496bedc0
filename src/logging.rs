//! Structured logging on stderr.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins when set; otherwise
/// `info` (or `debug` with `--verbose`) for lawdex and warnings from sqlx.
pub fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,sqlx=warn")
        } else {
            EnvFilter::new("info,sqlx=warn")
        }
    });

    // A second init (e.g. from tests) is not an error worth reporting.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init();
}

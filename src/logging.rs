//! Process-wide tracing setup

use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Install the tracing subscriber on first call; later calls do nothing.
///
/// `RUST_LOG` wins when set, otherwise `info`, or `debug` when verbose.
/// Logs go to stderr so command output on stdout stays clean.
pub fn initialize_once(verbose: bool) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        });

        let installed = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .try_init();
        if installed.is_err() {
            tracing::debug!("a global tracing subscriber was already installed");
        }
    });
}

pub fn is_initialized() -> bool {
    INIT.is_completed()
}

//! Log output for binaries and tests that embed the runtime.

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding the `tracing` filter directive.
pub const ENV_LOG: &str = "GEMMRS_LOG";

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Installs a formatted subscriber filtered by `GEMMRS_LOG` (default `info`).
///
/// Calling it again is a no-op. Returns `false` when a subscriber was already
/// installed, by this function or by the embedding application.
pub fn init_tracing() -> bool {
    if INITIALISED.set(()).is_err() {
        return false;
    }
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

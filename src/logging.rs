//! Diagnostic logging setup for the binary.
//!
//! Events go to stderr so they never mix with exported payloads on
//! stdout.  The filter comes from `ARTVAULT_LOG` (e.g. `artvault=debug`);
//! without it only warnings are shown, or debug output with `-v`.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "ARTVAULT_LOG";

/// Install the global subscriber.  Safe to call more than once.
pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

//! Logger initialization.

use env_logger::Env;

/// Initializes the process logger with an `info` default filter. Calling it
/// more than once is harmless.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info")).try_init();
    log::debug!("Logging initialized");
}

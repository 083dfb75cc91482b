//! Logging utilities
//!
//! The library logs through the `log` facade; binaries and tests pick the
//! sink. `init` wires up `env_logger` and is safe to call more than once.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
pub fn init() {
    let _ = env_logger::Builder::from_default_env().try_init();
}

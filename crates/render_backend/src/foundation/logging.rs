//! Logging bootstrap
//!
//! Library code only uses the `log` facade; applications pick the sink.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system
///
/// Honors `RUST_LOG` and falls back to `info` when it is unset. Calling this
/// more than once is harmless.
pub fn init() {
    init_with_default("info");
}

/// Initialize the logging system with a custom fallback filter
pub fn init_with_default(filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init_with_default("debug");
        info!("logger initialized twice without panicking");
    }
}

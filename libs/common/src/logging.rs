//! Log filtering shared by the services

use tracing_subscriber::EnvFilter;

/// Directive used when `RUST_LOG` is unset or unparsable
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Filter from `RUST_LOG`, falling back to [`DEFAULT_DIRECTIVE`]
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_to_info_without_rust_log() {
        unsafe {
            std::env::remove_var("RUST_LOG");
        }

        assert_eq!(env_filter().to_string(), "info");
    }

    #[test]
    #[serial]
    fn rust_log_can_raise_verbosity() {
        unsafe {
            std::env::set_var("RUST_LOG", "generation=debug");
        }

        assert_eq!(env_filter().to_string(), "generation=debug");

        unsafe {
            std::env::remove_var("RUST_LOG");
        }
    }
}

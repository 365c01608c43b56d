//! Tracing subscriber setup for binaries embedding the supervisor.
//!
//! Level is controlled by `RUST_LOG`; without it every `balsync_*` crate
//! logs at INFO. Library code never calls this.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Directive used when `RUST_LOG` is unset or unparseable.
pub const DEFAULT_FILTER: &str = "balsync=info";

/// Install a global subscriber writing to stderr, as plain text or JSON lines.
///
/// Returns `false` if a global subscriber was already installed, which
/// makes repeated calls (tests, embedding applications) harmless.
pub fn init_tracing(json: bool) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_a_no_op() {
        // Either call may find the global slot taken; the second always does.
        let _ = init_tracing(false);
        assert!(!init_tracing(true));
    }

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }
}

use tracing_subscriber::{fmt, EnvFilter};

/// Install a fmt subscriber. `RUST_LOG` overrides `default_directive`.
///
/// Returns `false` when a global subscriber was already set, which is the
/// normal case for a host application that configures its own.
pub fn init_logging(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_logging("info");
        assert!(!init_logging("debug"));
    }
}

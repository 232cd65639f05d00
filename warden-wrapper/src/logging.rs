//! Logging initialisation for vm-warden.
//!
//! Output goes to stderr, which the host captures into the task's log.
//! `--debug` picks the default level; `RUST_LOG` overrides it.

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Maps the wrapper's numeric `--debug` level to a tracing level.
#[must_use]
pub fn level_for(debug: u8) -> LevelFilter {
    match debug {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    }
}

/// Initialise the global tracing subscriber. Call once from `main`.
pub fn init(debug: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(debug).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_levels_map_to_tracing_levels() {
        assert_eq!(level_for(0), LevelFilter::OFF);
        assert_eq!(level_for(1), LevelFilter::ERROR);
        assert_eq!(level_for(2), LevelFilter::WARN);
        assert_eq!(level_for(3), LevelFilter::INFO);
        assert_eq!(level_for(4), LevelFilter::DEBUG);
        assert_eq!(level_for(9), LevelFilter::DEBUG);
    }
}

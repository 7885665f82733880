//! Engine configuration.

use std::time::Duration;

/// Tuning knobs for dispatch and polling.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fixed interval between poll cycles. No backoff; the synthesis job's
    /// own completion time dominates.
    pub poll_interval: Duration,
    /// Number of document dispatch workers.
    pub dispatch_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            dispatch_workers: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_interval_is_two_seconds() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.dispatch_workers > 0);
    }
}

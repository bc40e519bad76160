use std::time::Duration;

/// Knobs for the executor. Everything is a plain field so embedders and
/// tests set what they need; there is no global state.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Inputs with more rows than this stream instead of materializing.
    pub streaming_threshold: u64,
    /// The capped `groupBy | top(n)` buffer holds
    /// `max(group_buffer_multiplier * n, group_buffer_floor)` groups.
    /// Lowering the multiplier trades accuracy for memory.
    pub group_buffer_multiplier: usize,
    pub group_buffer_floor: usize,
    /// Row count of the `top` injected when a too-large input has no
    /// stream-friendly leading operator.
    pub default_top: usize,
    /// Minimum time between progress emissions on the diagnostic sink.
    pub progress_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            streaming_threshold: 5_000_000,
            group_buffer_multiplier: 5,
            group_buffer_floor: 1000,
            default_top: 100,
            progress_interval: Duration::from_millis(500),
        }
    }
}

impl EngineConfig {
    pub fn group_buffer(&self, top_count: usize) -> usize {
        (self.group_buffer_multiplier * top_count).max(self.group_buffer_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_buffer_has_a_floor() {
        let config = EngineConfig::default();

        assert_eq!(config.group_buffer(10), 1000);
        assert_eq!(config.group_buffer(500), 2500);
    }
}

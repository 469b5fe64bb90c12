//! Run loop configuration

use std::time::Duration;

/// Run loop configuration
#[derive(Debug, Clone)]
pub struct RunLoopConfig {
    /// Period between the starts of consecutive ticks
    pub tick: Duration,
    /// Tick duration above which a warning is logged
    pub cpu_budget: Duration,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(16),
            cpu_budget: Duration::from_millis(16),
        }
    }
}

use std::time::Duration;

/// Timing configuration; plain data so tests can shrink every delay.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Staggered badge re-check delays after a tab finishes loading.
    pub badge_recheck_delays: Vec<Duration>,
    /// Interval between garbage-collection passes over stored bindings.
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            badge_recheck_delays: [0u64, 150, 400, 700, 1100]
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

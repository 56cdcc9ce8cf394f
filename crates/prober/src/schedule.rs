use std::time::Duration;

/// Cumulative detection delays, measured from the moment probing starts.
const DEFAULT_OFFSETS_MS: &[u64] = &[0, 100, 300, 600, 1000, 2000, 4000, 7000, 10000];

/// The retry schedule is plain data so tests can substitute a short one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrySchedule {
    offsets_ms: Vec<u64>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self::new(DEFAULT_OFFSETS_MS.to_vec())
    }
}

impl RetrySchedule {
    pub fn new(offsets_ms: Vec<u64>) -> Self {
        Self { offsets_ms }
    }

    /// An immediate-only schedule, useful in tests.
    pub fn immediate(ticks: usize) -> Self {
        Self::new(vec![0; ticks])
    }

    pub fn len(&self) -> usize {
        self.offsets_ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets_ms.is_empty()
    }

    /// Inter-tick sleep durations derived from the cumulative offsets.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut previous = 0u64;
        self.offsets_ms.iter().map(move |offset| {
            let wait = offset.saturating_sub(previous);
            previous = (*offset).max(previous);
            Duration::from_millis(wait)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_has_nine_ticks() {
        let schedule = RetrySchedule::default();
        assert_eq!(schedule.len(), 9);
        let intervals: Vec<u64> = schedule.intervals().map(|d| d.as_millis() as u64).collect();
        assert_eq!(intervals, vec![0, 100, 200, 300, 400, 1000, 2000, 3000, 3000]);
    }

    #[test]
    fn non_monotonic_offsets_never_yield_negative_waits() {
        let schedule = RetrySchedule::new(vec![500, 200, 700]);
        let intervals: Vec<u64> = schedule.intervals().map(|d| d.as_millis() as u64).collect();
        assert_eq!(intervals, vec![500, 0, 200]);
    }

    #[test]
    fn immediate_schedule_is_all_zero() {
        let schedule = RetrySchedule::immediate(3);
        assert!(schedule.intervals().all(|d| d.is_zero()));
    }
}

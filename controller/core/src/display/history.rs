//! Rolling write-duration history for progress estimation

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use crate::engine::table::StateId;

/// Number of past writes averaged per estimate
pub const HISTORY_WINDOW: usize = 3;

/// Estimate used before any write of a kind has been observed
pub const DEFAULT_ESTIMATE: Duration = Duration::from_secs(30);

/// Rolling window of recent write durations, keyed by target state and
/// whether the write included a clear cycle
///
/// Clearing writes take roughly twice as long as plain ones, so the two
/// populations are kept apart.
#[derive(Debug)]
pub struct DurationHistory {
    window: usize,
    default: Duration,
    samples: HashMap<(StateId, bool), VecDeque<Duration>>,
}

impl DurationHistory {
    /// History averaging the last `window` samples per key, answering
    /// `default` until samples exist
    #[must_use]
    pub fn new(window: usize, default: Duration) -> Self {
        Self {
            window,
            default,
            samples: HashMap::new(),
        }
    }

    /// Record a completed write's duration
    pub fn record(&mut self, state: &StateId, cleared: bool, duration: Duration) {
        let bucket = self
            .samples
            .entry((state.clone(), cleared))
            .or_insert_with(|| VecDeque::with_capacity(self.window));
        if bucket.len() == self.window {
            bucket.pop_front();
        }
        bucket.push_back(duration);
    }

    /// Expected duration of the next write of this kind
    #[must_use]
    pub fn estimate(&self, state: &StateId, cleared: bool) -> Duration {
        match self.samples.get(&(state.clone(), cleared)) {
            Some(bucket) if !bucket.is_empty() => {
                bucket.iter().sum::<Duration>() / bucket.len() as u32
            }
            _ => self.default,
        }
    }
}

impl Default for DurationHistory {
    fn default() -> Self {
        Self::new(HISTORY_WINDOW, DEFAULT_ESTIMATE)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn state(s: &str) -> StateId {
        StateId::from(s)
    }

    #[test]
    fn defaults_until_first_sample() {
        let history = DurationHistory::default();
        assert_eq!(history.estimate(&state("idle"), false), DEFAULT_ESTIMATE);
    }

    #[test]
    fn averages_recorded_samples() {
        let mut history = DurationHistory::default();
        history.record(&state("idle"), false, Duration::from_secs(10));
        history.record(&state("idle"), false, Duration::from_secs(20));
        assert_eq!(
            history.estimate(&state("idle"), false),
            Duration::from_secs(15)
        );
    }

    #[test]
    fn window_evicts_oldest_sample() {
        let mut history = DurationHistory::new(3, DEFAULT_ESTIMATE);
        for secs in [10, 20, 30, 40] {
            history.record(&state("idle"), false, Duration::from_secs(secs));
        }
        // 10 fell out of the window.
        assert_eq!(
            history.estimate(&state("idle"), false),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn clearing_and_plain_writes_are_separate_populations() {
        let mut history = DurationHistory::default();
        history.record(&state("idle"), true, Duration::from_secs(60));
        assert_eq!(
            history.estimate(&state("idle"), true),
            Duration::from_secs(60)
        );
        assert_eq!(history.estimate(&state("idle"), false), DEFAULT_ESTIMATE);
    }

    #[test]
    fn states_are_separate_populations() {
        let mut history = DurationHistory::default();
        history.record(&state("idle"), false, Duration::from_secs(5));
        assert_eq!(history.estimate(&state("menu"), false), DEFAULT_ESTIMATE);
    }
}

//! Pass/fail hysteresis used to log check state transitions

/// Consecutive pass and fail counters. A check is passing once it has more
/// than `threshold` consecutive passes, failing once it has more than
/// `threshold` consecutive failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckStateMachine {
    passes: u32,
    failures: u32,
    threshold: u32,
}

impl CheckStateMachine {
    pub fn new(threshold: u32) -> Self {
        Self {
            passes: 0,
            failures: 0,
            threshold,
        }
    }

    /// Record a failed check. `on_change` runs only when this call flips
    /// the failing state.
    pub fn record_fail<F: FnOnce()>(&mut self, on_change: F) -> bool {
        let was_failing = self.is_failing();
        self.passes = 0;
        self.failures = self.failures.saturating_add(1);

        let changed = self.is_failing() != was_failing;
        if changed {
            on_change();
        }
        changed
    }

    /// Record a passed check. `on_change` runs only when this call flips
    /// the passing state.
    pub fn record_pass<F: FnOnce()>(&mut self, on_change: F) -> bool {
        let was_passing = self.is_passing();
        self.failures = 0;
        self.passes = self.passes.saturating_add(1);

        let changed = self.is_passing() != was_passing;
        if changed {
            on_change();
        }
        changed
    }

    pub fn is_passing(&self) -> bool {
        self.passes > self.threshold
    }

    pub fn is_failing(&self) -> bool {
        self.failures > self.threshold
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_edge_fires_once() {
        let mut sm = CheckStateMachine::new(1);
        let mut fired_at = Vec::new();

        for pass in 1..=3 {
            sm.record_pass(|| fired_at.push(pass));
        }

        // Only the second pass crosses the threshold.
        assert_eq!(fired_at, vec![2]);
        assert!(sm.is_passing());
        assert_eq!(sm.passes(), 3);
    }

    #[test]
    fn test_edge_happens_on_crossing_call() {
        let mut sm = CheckStateMachine::new(1);
        assert!(!sm.record_pass(|| {}));
        assert!(sm.record_pass(|| {}));
        assert!(!sm.record_pass(|| {}));
    }

    #[test]
    fn test_fail_edge_and_reset() {
        let mut sm = CheckStateMachine::new(2);
        let mut count = 0;

        sm.record_pass(|| {});
        sm.record_pass(|| {});
        sm.record_pass(|| {});
        assert!(sm.is_passing());

        for _ in 0..5 {
            sm.record_fail(|| count += 1);
        }
        assert_eq!(count, 1);
        assert!(sm.is_failing());
        assert_eq!(sm.passes(), 0);
        assert_eq!(sm.failures(), 5);
    }

    #[test]
    fn test_pass_after_failing_resets_failures() {
        let mut sm = CheckStateMachine::new(0);

        assert!(sm.record_fail(|| {}));
        assert!(sm.is_failing());

        // Passing resets failures; the pass edge fires, the failing flag
        // drops silently.
        assert!(sm.record_pass(|| {}));
        assert!(!sm.is_failing());
        assert!(sm.is_passing());

        // Failing again clears passes and fires the fail edge.
        assert!(sm.record_fail(|| {}));
        assert!(!sm.is_passing());
    }

    #[test]
    fn test_threshold_zero_fires_on_first_result() {
        let mut sm = CheckStateMachine::new(0);
        let mut fired = false;
        sm.record_pass(|| fired = true);
        assert!(fired);
    }
}

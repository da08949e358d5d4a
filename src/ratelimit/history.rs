//! Per-client admission history.

use std::collections::VecDeque;

use super::clock::Timestamp;
use super::policy::Policy;

/// Instants at which a client's requests were admitted, oldest first.
///
/// The sequence is kept sorted even if an instant arrives out of order.
/// Stale entries are tolerated: they are skipped when counting and only
/// removed by [`ClientHistory::prune`].
#[derive(Debug, Clone, Default)]
pub struct ClientHistory {
    admitted: VecDeque<Timestamp>,
}

impl ClientHistory {
    /// Create a history holding a single admission.
    pub fn starting_at(at: Timestamp) -> Self {
        let mut admitted = VecDeque::with_capacity(4);
        admitted.push_back(at);
        Self { admitted }
    }

    /// Number of leading entries that no longer count at `now`.
    fn stale_prefix(&self, policy: &Policy, now: Timestamp) -> usize {
        self.admitted
            .partition_point(|at| !policy.is_active(*at, now))
    }

    /// Count admissions inside `policy`'s window ending at `now`.
    pub fn active_count(&self, policy: &Policy, now: Timestamp) -> usize {
        self.admitted.len() - self.stale_prefix(policy, now)
    }

    /// Record an admission.
    pub fn record(&mut self, at: Timestamp) {
        match self.admitted.back() {
            Some(last) if *last > at => {
                let index = self.admitted.partition_point(|t| *t <= at);
                self.admitted.insert(index, at);
            }
            _ => self.admitted.push_back(at),
        }
    }

    /// Drop admissions outside `policy`'s window ending at `now`, returning
    /// how many were removed.
    ///
    /// Only entries that [`ClientHistory::active_count`] would skip are removed.
    pub fn prune(&mut self, policy: &Policy, now: Timestamp) -> usize {
        let stale = self.stale_prefix(policy, now);
        self.admitted.drain(..stale);
        stale
    }

    /// The most recent admission, if any.
    pub fn last_admitted(&self) -> Option<Timestamp> {
        self.admitted.back().copied()
    }

    /// Number of recorded admissions, stale ones included.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    /// Whether no admissions are recorded.
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};

    fn at(minutes: i64) -> Timestamp {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1) + TimeDelta::minutes(minutes)
    }

    fn five_minute_policy() -> Policy {
        Policy::new(TimeDelta::minutes(5), 10).unwrap()
    }

    #[test]
    fn test_history_starts_with_one_admission() {
        let history = ClientHistory::starting_at(at(0));
        assert_eq!(history.len(), 1);
        assert_eq!(history.last_admitted(), Some(at(0)));
    }

    #[test]
    fn test_active_count_skips_stale_entries() {
        let policy = five_minute_policy();
        let mut history = ClientHistory::starting_at(at(0));
        history.record(at(5));
        history.record(at(10));
        history.record(at(12));

        assert_eq!(history.active_count(&policy, at(4)), 4);
        // Window edge itself is excluded.
        assert_eq!(history.active_count(&policy, at(10)), 2);
        assert_eq!(history.active_count(&policy, at(17)), 0);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_active_count_with_duplicate_timestamps() {
        let policy = five_minute_policy();
        let mut history = ClientHistory::starting_at(at(3));
        history.record(at(3));
        history.record(at(3));

        assert_eq!(history.active_count(&policy, at(7)), 3);
        assert_eq!(history.active_count(&policy, at(8)), 0);
    }

    #[test]
    fn test_out_of_order_record_keeps_sequence_sorted() {
        let policy = five_minute_policy();
        let mut history = ClientHistory::starting_at(at(1));
        history.record(at(9));
        history.record(at(2));
        history.record(at(0));

        assert_eq!(history.last_admitted(), Some(at(9)));
        assert_eq!(
            history.admitted.iter().copied().collect::<Vec<_>>(),
            vec![at(0), at(1), at(2), at(9)]
        );
        // Window (at(1), at(6)] holds at(2) only, plus at(9) beyond it.
        assert_eq!(history.active_count(&policy, at(6)), 2);
    }

    #[test]
    fn test_prune_removes_only_stale_entries() {
        let policy = five_minute_policy();
        let mut history = ClientHistory::starting_at(at(0));
        history.record(at(5));
        history.record(at(10));

        let before = history.active_count(&policy, at(10));
        let removed = history.prune(&policy, at(10));

        assert_eq!(removed, 2);
        assert_eq!(history.len(), 1);
        assert_eq!(history.active_count(&policy, at(10)), before);
        assert_eq!(history.last_admitted(), Some(at(10)));
    }

    #[test]
    fn test_prune_can_empty_history() {
        let policy = five_minute_policy();
        let mut history = ClientHistory::starting_at(at(0));

        assert_eq!(history.prune(&policy, at(5)), 1);
        assert!(history.is_empty());
        assert_eq!(history.last_admitted(), None);
        assert_eq!(history.prune(&policy, at(6)), 0);
    }
}

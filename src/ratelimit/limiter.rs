//! Core admission engine.

use chrono::TimeDelta;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock, Timestamp};
use super::history::ClientHistory;
use super::key::ClientKey;
use super::policy::Policy;
use crate::config::LimiterConfig;
use crate::error::Result;

/// Totals from one [`Limiter::prune_stale`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Out-of-window timestamps dropped
    pub timestamps_removed: usize,
    /// Clients whose history became empty and were removed
    pub clients_removed: usize,
}

/// Per-client trailing-window rate limiter.
///
/// This struct is thread-safe and can be shared across threads behind an
/// `Arc`. Each decision for a key runs while holding that key's map shard
/// exclusively, so the count and the append it guards are one atomic step.
pub struct Limiter<C: Clock = SystemClock> {
    /// Quota applied to every client
    policy: Policy,
    /// Time source for every decision
    clock: C,
    /// Admission history indexed by client key
    histories: DashMap<ClientKey, ClientHistory>,
    /// Drop a key's stale timestamps when admitting it
    prune_on_admit: bool,
}

impl Limiter<SystemClock> {
    /// Create a limiter on the wall clock with the default 10 minute / 5 request policy.
    pub fn with_defaults() -> Self {
        Self::new(SystemClock, Policy::default())
    }

    /// Create a limiter on the wall clock from configuration.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        Self::from_config_with_clock(SystemClock, config)
    }
}

impl<C: Clock> Limiter<C> {
    /// Create a new limiter reading time from `clock`.
    pub fn new(clock: C, policy: Policy) -> Self {
        Self {
            policy,
            clock,
            histories: DashMap::new(),
            prune_on_admit: true,
        }
    }

    /// Create a limiter from configuration with an explicit clock.
    pub fn from_config_with_clock(clock: C, config: &LimiterConfig) -> Result<Self> {
        let limiter = Self::new(clock, config.policy()?).prune_on_admit(config.prune_on_admit);
        Ok(limiter)
    }

    /// Set whether stale timestamps are dropped during admission.
    pub fn prune_on_admit(mut self, enabled: bool) -> Self {
        self.prune_on_admit = enabled;
        self
    }

    /// Decide whether a request from `key` is admitted right now.
    ///
    /// Returns `true` and records the admission if fewer than
    /// `max_requests` admissions fall inside the trailing window; otherwise
    /// returns `false` and leaves the history untouched. The clock is read
    /// while the key is locked, so admissions are recorded in time order.
    pub fn admit(&self, key: &ClientKey) -> bool {
        self.decide(key, || self.clock.now())
    }

    /// Decide admission for `key` at an explicit instant.
    ///
    /// Callers must take `now` from this limiter's clock timeline. An
    /// instant older than admissions already recorded is still counted
    /// against the same window.
    pub fn admit_at(&self, key: &ClientKey, now: Timestamp) -> bool {
        self.decide(key, || now)
    }

    fn decide(&self, key: &ClientKey, now: impl FnOnce() -> Timestamp) -> bool {
        let mut history = match self.histories.entry(key.clone()) {
            Entry::Vacant(entry) => {
                let now = now();
                debug!(client = %key, now = %now, "First request from client");
                entry.insert(ClientHistory::starting_at(now));
                return true;
            }
            Entry::Occupied(entry) => entry.into_ref(),
        };

        let now = now();
        trace!(client = %key, now = %now, "Checking rate limit");

        let active = history.active_count(&self.policy, now);

        if active >= self.policy.max_requests() as usize {
            debug!(
                client = %key,
                active = active,
                limit = self.policy.max_requests(),
                "Rate limit exceeded"
            );
            return false;
        }

        // Denials never touch the history.
        if self.prune_on_admit {
            history.prune(&self.policy, now);
        }
        history.record(now);
        true
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// The clock this limiter reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Number of clients currently tracked.
    pub fn client_count(&self) -> usize {
        self.histories.len()
    }

    /// Admissions inside the current window for `key`.
    ///
    /// Returns `None` if the key has never been admitted or was evicted.
    pub fn active_count(&self, key: &ClientKey) -> Option<usize> {
        let history = self.histories.get(key)?;
        Some(history.active_count(&self.policy, self.clock.now()))
    }

    /// Admissions still available to `key` in the current window.
    pub fn remaining(&self, key: &ClientKey) -> u32 {
        let max = self.policy.max_requests();
        match self.active_count(key) {
            Some(active) => max.saturating_sub(u32::try_from(active).unwrap_or(u32::MAX)),
            None => max,
        }
    }

    /// Drop out-of-window timestamps for every client and forget clients
    /// left with no history.
    pub fn prune_stale(&self) -> PruneStats {
        let now = self.clock.now();
        let mut stats = PruneStats::default();

        self.histories.retain(|_, history| {
            stats.timestamps_removed += history.prune(&self.policy, now);
            if history.is_empty() {
                stats.clients_removed += 1;
                false
            } else {
                true
            }
        });

        if stats.timestamps_removed > 0 {
            debug!(
                timestamps_removed = stats.timestamps_removed,
                clients_removed = stats.clients_removed,
                "Pruned stale admissions"
            );
        }

        stats
    }

    /// Forget clients whose last admission is at or before `now - idle_ttl`.
    ///
    /// `idle_ttl` shorter than the window is raised to the window, so no
    /// admission that still counts is ever forgotten.
    pub fn evict_idle(&self, idle_ttl: TimeDelta) -> usize {
        let idle_ttl = idle_ttl.max(self.policy.window());
        let Some(cutoff) = self.clock.now().checked_sub_signed(idle_ttl) else {
            // Nothing can have been idle that long yet.
            return 0;
        };
        let mut evicted = 0;

        self.histories.retain(|_, history| match history.last_admitted() {
            Some(last) if last > cutoff => true,
            _ => {
                evicted += 1;
                false
            }
        });

        if evicted > 0 {
            debug!(evicted = evicted, "Evicted idle clients");
        }

        evicted
    }

    /// Forget every client.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.histories.clear();
    }
}

impl Default for Limiter<SystemClock> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ManualClock;
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    fn test_limiter() -> (Arc<ManualClock>, Limiter<Arc<ManualClock>>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1),
        ));
        let limiter = Limiter::new(clock.clone(), Policy::default());
        (clock, limiter)
    }

    #[test]
    fn test_limiter_creation() {
        let limiter = Limiter::with_defaults();
        assert_eq!(limiter.client_count(), 0);
        assert_eq!(limiter.policy(), &Policy::default());
    }

    #[test]
    fn test_first_request_creates_history() {
        let (_, limiter) = test_limiter();
        let key = ClientKey::new("1.1.1.1", "Agent X");

        assert!(limiter.admit(&key));
        assert_eq!(limiter.client_count(), 1);
        assert_eq!(limiter.active_count(&key), Some(1));
    }

    #[test]
    fn test_admit_counts_up_to_limit() {
        let (_, limiter) = test_limiter();
        let key = ClientKey::new("1.1.1.1", "Agent X");

        for expected in 1..=5 {
            assert!(limiter.admit(&key));
            assert_eq!(limiter.active_count(&key), Some(expected));
        }

        assert!(!limiter.admit(&key));
        assert_eq!(limiter.active_count(&key), Some(5));
        assert_eq!(limiter.remaining(&key), 0);
    }

    #[test]
    fn test_denial_does_not_extend_history() {
        let (clock, limiter) = test_limiter();
        let key = ClientKey::new("1.1.1.1", "Agent X");

        for _ in 0..5 {
            assert!(limiter.admit(&key));
        }

        // Denials inside the window must not push the window forward.
        for _ in 0..3 {
            clock.advance(TimeDelta::minutes(3));
            assert!(!limiter.admit(&key));
        }

        clock.advance(TimeDelta::minutes(1) + TimeDelta::seconds(1));
        assert!(limiter.admit(&key));
    }

    #[test]
    fn test_remaining_for_unknown_key() {
        let (_, limiter) = test_limiter();
        let key = ClientKey::new("2.2.2.2", "Agent Y");

        assert_eq!(limiter.active_count(&key), None);
        assert_eq!(limiter.remaining(&key), 5);
    }

    #[test]
    fn test_prune_on_admit_keeps_decisions() {
        let (clock, pruning) = test_limiter();
        let keeping = Limiter::new(clock.clone(), Policy::default()).prune_on_admit(false);
        let key = ClientKey::new("1.1.1.1", "Agent X");

        let mut pruned_decisions = Vec::new();
        let mut kept_decisions = Vec::new();
        for _ in 0..40 {
            pruned_decisions.push(pruning.admit(&key));
            kept_decisions.push(keeping.admit(&key));
            clock.advance(TimeDelta::seconds(50));
        }

        assert_eq!(pruned_decisions, kept_decisions);
        assert!(pruning.histories.get(&key).unwrap().len() <= 5);
        assert!(keeping.histories.get(&key).unwrap().len() > 5);
    }

    #[test]
    fn test_prune_stale_removes_expired_clients() {
        let (clock, limiter) = test_limiter();
        let old = ClientKey::new("1.1.1.1", "Agent X");
        let fresh = ClientKey::new("2.2.2.2", "Agent Y");

        limiter.admit(&old);
        limiter.admit(&old);
        clock.advance(TimeDelta::minutes(8));
        limiter.admit(&fresh);
        clock.advance(TimeDelta::minutes(2));

        let stats = limiter.prune_stale();

        assert_eq!(
            stats,
            PruneStats {
                timestamps_removed: 2,
                clients_removed: 1,
            }
        );
        assert_eq!(limiter.client_count(), 1);
        assert_eq!(limiter.active_count(&fresh), Some(1));
    }

    #[test]
    fn test_evict_idle_clients() {
        let (clock, limiter) = test_limiter();
        let idle = ClientKey::new("1.1.1.1", "Agent X");
        let busy = ClientKey::new("2.2.2.2", "Agent Y");

        limiter.admit(&idle);
        clock.advance(TimeDelta::minutes(15));
        limiter.admit(&busy);
        clock.advance(TimeDelta::minutes(6));

        assert_eq!(limiter.evict_idle(TimeDelta::minutes(20)), 1);
        assert_eq!(limiter.active_count(&idle), None);
        assert_eq!(limiter.active_count(&busy), Some(1));
    }

    #[test]
    fn test_evict_idle_never_shorter_than_window() {
        let (clock, limiter) = test_limiter();
        let key = ClientKey::new("1.1.1.1", "Agent X");

        for _ in 0..5 {
            limiter.admit(&key);
        }
        clock.advance(TimeDelta::minutes(5));

        assert_eq!(limiter.evict_idle(TimeDelta::seconds(1)), 0);
        assert!(!limiter.admit(&key));
    }

    #[test]
    fn test_out_of_order_admissions_keep_quota() {
        let (clock, _) = test_limiter();
        let limiter = Limiter::new(clock.clone(), Policy::new(TimeDelta::minutes(10), 2).unwrap());
        let key = ClientKey::new("1.1.1.1", "Agent X");
        let t = clock.now();

        // Recorded newest first, as when two callers take the lock in the
        // opposite order to the instants they carry.
        assert!(limiter.admit_at(&key, t + TimeDelta::nanoseconds(1)));
        assert!(limiter.admit_at(&key, t));

        // Window (t, t + 10m] still holds the admission at t + 1ns.
        let later = t + TimeDelta::minutes(10);
        assert!(limiter.admit_at(&key, later));
        assert!(!limiter.admit_at(&key, later));
        assert_eq!(limiter.histories.get(&key).unwrap().last_admitted(), Some(later));
    }

    #[test]
    fn test_admit_near_earliest_instant() {
        let clock = Arc::new(ManualClock::new(DateTime::<Utc>::MIN_UTC));
        let limiter = Limiter::new(clock.clone(), Policy::default());
        let key = ClientKey::new("1.1.1.1", "Agent X");

        for _ in 0..5 {
            assert!(limiter.admit(&key));
        }
        assert!(!limiter.admit(&key));
        assert_eq!(limiter.active_count(&key), Some(5));
        assert_eq!(limiter.prune_stale(), PruneStats::default());
        assert_eq!(limiter.evict_idle(TimeDelta::minutes(20)), 0);

        clock.advance(TimeDelta::minutes(10));
        assert!(limiter.admit(&key));
    }

    #[test]
    fn test_clear() {
        let (_, limiter) = test_limiter();
        limiter.admit(&ClientKey::new("1.1.1.1", "Agent X"));
        assert_eq!(limiter.client_count(), 1);

        limiter.clear();
        assert_eq!(limiter.client_count(), 0);
    }

    #[test]
    fn test_from_config() {
        let config = LimiterConfig {
            window_secs: 60,
            max_requests_per_window: 2,
            prune_on_admit: false,
        };
        let limiter = Limiter::from_config(&config).unwrap();

        assert_eq!(limiter.policy().window(), TimeDelta::seconds(60));
        assert_eq!(limiter.policy().max_requests(), 2);
        assert!(!limiter.prune_on_admit);
    }
}

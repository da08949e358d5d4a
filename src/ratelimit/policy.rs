//! Quota policy: trailing window length and admissions allowed within it.

use std::time::Duration;

use chrono::TimeDelta;

use super::clock::Timestamp;
use crate::error::{Result, TurnstileError};

/// Default trailing window length, in seconds.
pub const DEFAULT_WINDOW_SECS: i64 = 600;
/// Default number of admissions allowed per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 5;

/// A fixed trailing-window quota.
///
/// A timestamp `t` is inside the window ending at `now` iff
/// `t > now - window`. An admission exactly one window old no longer counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    window: TimeDelta,
    max_requests: u32,
}

impl Policy {
    /// Create a policy, rejecting an empty window or a zero quota.
    pub fn new(window: TimeDelta, max_requests: u32) -> Result<Self> {
        if window <= TimeDelta::zero() {
            return Err(TurnstileError::InvalidPolicy(format!(
                "window must be positive, got {}",
                window
            )));
        }

        if max_requests == 0 {
            return Err(TurnstileError::InvalidPolicy(
                "max requests per window must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            window,
            max_requests,
        })
    }

    /// Create a policy from a std duration, as found in configuration.
    pub fn from_std(window: Duration, max_requests: u32) -> Result<Self> {
        let window = TimeDelta::from_std(window).map_err(|e| {
            TurnstileError::InvalidPolicy(format!("window {:?} out of range: {}", window, e))
        })?;
        Self::new(window, max_requests)
    }

    /// Length of the trailing window.
    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Admissions allowed per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// The exclusive lower edge of the window ending at `now`.
    ///
    /// `None` when the edge falls before the earliest representable instant,
    /// in which case every recorded admission is inside the window.
    pub fn window_start(&self, now: Timestamp) -> Option<Timestamp> {
        now.checked_sub_signed(self.window)
    }

    /// Whether an admission recorded at `at` still counts at `now`.
    pub fn is_active(&self, at: Timestamp, now: Timestamp) -> bool {
        self.window_start(now).map_or(true, |start| at > start)
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            window: TimeDelta::seconds(DEFAULT_WINDOW_SECS),
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

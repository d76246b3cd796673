//! Per-user fixed-window rate limiting.
//!
//! One stored timestamp per user, shared across all search commands: the
//! admit itself is the permit (the timestamp is updated as a side effect of
//! a successful check), so there is no separate "consume" step. The caller
//! holds this behind a mutex so check-and-update is atomic per request.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::domain::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Admit,
    Deny { wait_secs: u64 },
}

#[derive(Clone, Debug)]
pub struct RateLimiter {
    window: Duration,
    last_request: HashMap<UserId, Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_request: HashMap::new(),
        }
    }

    pub fn check(&mut self, user_id: UserId) -> RateDecision {
        self.check_at(user_id, Instant::now())
    }

    /// Admit iff the user has no stored timestamp or the window has elapsed.
    /// On admit the stored timestamp moves to `now`; on deny it is unchanged.
    pub fn check_at(&mut self, user_id: UserId, now: Instant) -> RateDecision {
        if let Some(&last) = self.last_request.get(&user_id) {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.window {
                let wait_secs = (self.window - elapsed).as_secs_f64().round() as u64;
                return RateDecision::Deny { wait_secs };
            }
        }

        self.last_request.insert(user_id, now);
        RateDecision::Admit
    }

    /// Number of users with a stored timestamp (never expires before overwrite).
    pub fn tracked_users(&self) -> usize {
        self.last_request.len()
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::core::traits::Clock;
use crate::models::InteractionLimits;

/// Per-user and per-thread reply bookkeeping. Owned by the interaction
/// scheduler; nothing else touches it.
pub struct RateLimitTracker {
    max_replies_per_user: u32,
    max_replies_per_thread: u32,
    min_time_between_replies: Duration,
    user_reply_count: HashMap<String, u32>,
    user_last_reply: HashMap<String, DateTime<Utc>>,
    thread_reply_count: HashMap<String, u32>,
    last_cleanup: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl RateLimitTracker {
    pub const CLEANUP_INTERVAL_HOURS: i64 = 24;

    pub fn new(limits: &InteractionLimits, clock: Arc<dyn Clock>) -> Self {
        RateLimitTracker {
            max_replies_per_user: limits.max_replies_per_user,
            max_replies_per_thread: limits.max_replies_per_thread,
            min_time_between_replies: limits.min_time_between_replies,
            user_reply_count: HashMap::new(),
            user_last_reply: HashMap::new(),
            thread_reply_count: HashMap::new(),
            last_cleanup: clock.now(),
            clock,
        }
    }

    pub fn can_reply_to_user(&self, user_id: &str) -> bool {
        let count = self.user_reply_count.get(user_id).copied().unwrap_or(0);
        if count >= self.max_replies_per_user {
            return false;
        }
        match self.user_last_reply.get(user_id) {
            Some(last) => self.clock.now() - *last >= self.min_time_between_replies,
            None => true,
        }
    }

    pub fn can_reply_in_thread(&self, thread_id: &str) -> bool {
        self.thread_reply_count.get(thread_id).copied().unwrap_or(0) < self.max_replies_per_thread
    }

    /// Call once per reply that was actually sent.
    pub fn record_reply(&mut self, user_id: &str, thread_id: &str) {
        *self.user_reply_count.entry(user_id.to_string()).or_insert(0) += 1;
        *self.thread_reply_count.entry(thread_id.to_string()).or_insert(0) += 1;
        self.user_last_reply.insert(user_id.to_string(), self.clock.now());
    }

    /// Drops users whose last reply is older than a day and resets every
    /// thread counter.
    pub fn cleanup(&mut self) {
        let now = self.clock.now();
        let horizon = Duration::hours(Self::CLEANUP_INTERVAL_HOURS);
        let stale: Vec<String> = self
            .user_last_reply
            .iter()
            .filter(|(_, last)| now - **last > horizon)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &stale {
            self.user_last_reply.remove(user);
            self.user_reply_count.remove(user);
        }
        self.thread_reply_count.clear();
        self.last_cleanup = now;
        debug!(purged_users = stale.len(), "rate limit cleanup complete");
    }

    /// Runs `cleanup` when a full day has passed since the previous one.
    pub fn cleanup_if_due(&mut self) -> bool {
        if self.clock.now() - self.last_cleanup >= Duration::hours(Self::CLEANUP_INTERVAL_HOURS) {
            self.cleanup();
            true
        } else {
            false
        }
    }

    pub fn user_reply_count(&self, user_id: &str) -> u32 {
        self.user_reply_count.get(user_id).copied().unwrap_or(0)
    }

    pub fn thread_reply_count(&self, thread_id: &str) -> u32 {
        self.thread_reply_count.get(thread_id).copied().unwrap_or(0)
    }
}

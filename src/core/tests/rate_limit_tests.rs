// src/core/tests/rate_limit_tests.rs

use std::sync::Arc;

use chrono::Duration;

use super::mocks::{epoch, ManualClock};
use crate::core::rate_limit::RateLimitTracker;
use crate::models::InteractionLimits;

fn tracker(per_user: u32, per_thread: u32, gap_minutes: i64) -> (RateLimitTracker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    let limits = InteractionLimits {
        max_replies_per_user: per_user,
        max_replies_per_thread: per_thread,
        min_time_between_replies: Duration::minutes(gap_minutes),
        ..InteractionLimits::default()
    };
    (RateLimitTracker::new(&limits, clock.clone()), clock)
}

#[test]
fn test_unknown_user_and_thread_are_permitted() {
    let (tracker, _) = tracker(1, 1, 5);
    assert!(tracker.can_reply_to_user("nobody"), "Missing user entry should allow a reply");
    assert!(tracker.can_reply_in_thread("nowhere"), "Missing thread entry should allow a reply");
}

#[test]
fn test_user_cap_is_enforced() {
    let (mut tracker, clock) = tracker(2, 100, 0);

    tracker.record_reply("alice", "t1");
    assert!(tracker.can_reply_to_user("alice"));
    tracker.record_reply("alice", "t2");
    clock.advance(Duration::hours(1));

    assert!(!tracker.can_reply_to_user("alice"), "Third reply should be refused");
    assert!(tracker.can_reply_to_user("bob"), "Other users are unaffected");
    assert_eq!(tracker.user_reply_count("alice"), 2);
}

#[test]
fn test_min_time_between_replies() {
    let (mut tracker, clock) = tracker(10, 10, 5);

    tracker.record_reply("alice", "t1");
    assert!(!tracker.can_reply_to_user("alice"), "Immediately after a reply the gap is not met");

    clock.advance(Duration::minutes(4) + Duration::seconds(59));
    assert!(!tracker.can_reply_to_user("alice"));

    clock.advance(Duration::seconds(1));
    assert!(tracker.can_reply_to_user("alice"), "Exactly the minimum gap is enough");
}

#[test]
fn test_thread_cap_is_enforced() {
    let (mut tracker, _) = tracker(100, 2, 0);

    tracker.record_reply("alice", "t1");
    tracker.record_reply("bob", "t1");

    assert!(!tracker.can_reply_in_thread("t1"));
    assert!(tracker.can_reply_in_thread("t2"));
    assert_eq!(tracker.thread_reply_count("t1"), 2);
}

#[test]
fn test_cleanup_purges_only_stale_users_and_all_threads() {
    let (mut tracker, clock) = tracker(1, 1, 0);

    tracker.record_reply("old", "t1");
    clock.advance(Duration::hours(20));
    tracker.record_reply("recent", "t2");
    clock.advance(Duration::hours(4) + Duration::seconds(1));

    tracker.cleanup();

    assert!(tracker.can_reply_to_user("old"), "Entries older than a day are purged");
    assert_eq!(tracker.user_reply_count("old"), 0);
    assert!(!tracker.can_reply_to_user("recent"), "Younger entries survive cleanup");
    assert_eq!(tracker.user_reply_count("recent"), 1);
    assert!(tracker.can_reply_in_thread("t1"));
    assert!(tracker.can_reply_in_thread("t2"), "Thread counters reset wholesale");
}

#[test]
fn test_cleanup_keeps_entry_exactly_one_day_old() {
    let (mut tracker, clock) = tracker(1, 1, 0);

    tracker.record_reply("alice", "t1");
    clock.advance(Duration::hours(24));
    tracker.cleanup();

    assert_eq!(tracker.user_reply_count("alice"), 1);
}

#[test]
fn test_cleanup_if_due_runs_daily() {
    let (mut tracker, clock) = tracker(1, 1, 0);
    tracker.record_reply("alice", "t1");

    clock.advance(Duration::hours(23));
    assert!(!tracker.cleanup_if_due());
    assert!(!tracker.can_reply_in_thread("t1"));

    clock.advance(Duration::hours(1));
    assert!(tracker.cleanup_if_due());
    assert!(tracker.can_reply_in_thread("t1"));
    assert!(!tracker.cleanup_if_due(), "The next cleanup waits another day");
}

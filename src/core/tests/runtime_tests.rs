// src/core/tests/runtime_tests.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;

use tokio_util::sync::CancellationToken;

use super::mocks::{epoch, tweet, ManualClock, MockFeed, MockGenerator};
use crate::character::CharacterConfig;
use crate::config::Settings;
use crate::core::runtime::Runtime;
use crate::core::traits::write_json;
use crate::memory::{last_post_key, InMemoryCache, InMemoryConversationStore};
use crate::models::LastPost;

fn runtime_with_cache(feed: Arc<MockFeed>, cache: Arc<InMemoryCache>) -> Runtime {
    let env: HashMap<&str, &str> = [
        ("TWITTER_USERNAME", "@agent"),
        ("POST_INTERVAL_MIN", "90"),
        ("POST_INTERVAL_MAX", "90"),
        ("MIN_TIME_BETWEEN_REPLIES", "0"),
    ]
    .into_iter()
    .collect();
    let settings = Settings::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
    let character: CharacterConfig = serde_json::from_value(serde_json::json!({
        "name": "Agent",
        "prompt": "You are a terse commentator.",
        "topics": ["rust"]
    }))
    .unwrap();

    Runtime::new(
        settings,
        character,
        "42",
        feed,
        cache,
        Arc::new(InMemoryConversationStore::new()),
        Arc::new(MockGenerator::new("hello from the agent")),
        Arc::new(ManualClock::new(epoch())),
    )
}

fn runtime(feed: Arc<MockFeed>) -> Runtime {
    runtime_with_cache(feed, Arc::new(InMemoryCache::new()))
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_run_posts_once_and_returns() {
    let feed = Arc::new(MockFeed::new());
    let runtime = runtime(feed.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    runtime.run_periodically(true, cancel).await;

    let sent = feed.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "hello from the agent");
    assert!(sent[0].in_reply_to.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_both_schedulers_share_the_feed() {
    let feed = Arc::new(MockFeed::new());
    feed.set_mentions(vec![tweet("500", "alice", None)]);
    let runtime = runtime(feed.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    runtime.run_periodically(true, cancel).await;

    let sent = feed.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().any(|s| s.in_reply_to.is_none()));
    assert!(sent.iter().any(|s| s.in_reply_to.as_deref() == Some("500")));
}

#[tokio::test(start_paused = true)]
async fn test_recent_post_holds_back_scheduled_post() {
    let feed = Arc::new(MockFeed::new());
    let cache = Arc::new(InMemoryCache::new());
    let last = LastPost {
        id: "1".to_string(),
        timestamp: epoch() - Duration::minutes(10),
        is_special_interaction: false,
        special_interaction_type: None,
    };
    write_json(cache.as_ref(), &last_post_key("agent"), &last)
        .await
        .unwrap();
    let runtime = runtime_with_cache(feed.clone(), cache);
    let cancel = CancellationToken::new();
    cancel.cancel();

    runtime.run_periodically(false, cancel).await;

    assert!(feed.sent().is_empty());
}

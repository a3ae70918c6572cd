use std::collections::{HashSet, VecDeque};

use serde_json::json;
use tracing::{debug, warn};

use crate::core::traits::{ConversationStore, FeedClient};
use crate::models::{memory_id_for, room_id_for, MemoryRecord, Tweet};

/// Walks `in_reply_to_id` links upward from a candidate and returns the chain
/// oldest first. Every post seen on the way is written through to the
/// conversation store.
pub struct ThreadBuilder<'a> {
    feed: &'a dyn FeedClient,
    store: &'a dyn ConversationStore,
    agent_id: &'a str,
}

impl<'a> ThreadBuilder<'a> {
    pub fn new(feed: &'a dyn FeedClient, store: &'a dyn ConversationStore, agent_id: &'a str) -> Self {
        ThreadBuilder {
            feed,
            store,
            agent_id,
        }
    }

    /// The candidate sits at depth 0; at most `max_depth` ancestors follow it.
    /// Fetch failures truncate the thread instead of failing the call.
    pub async fn build_thread(&self, candidate: &Tweet, max_depth: usize) -> Vec<Tweet> {
        let mut thread = VecDeque::new();
        let mut visited = HashSet::new();
        let mut current = candidate.clone();
        let mut depth = 0;

        loop {
            if !visited.insert(current.id.clone()) {
                break;
            }
            self.remember(&current).await;

            let parent_id = current.in_reply_to_id.clone();
            thread.push_front(current);

            if depth >= max_depth {
                debug!(depth, "thread reached max depth");
                break;
            }
            let Some(parent_id) = parent_id else {
                break;
            };
            if visited.contains(&parent_id) {
                warn!(tweet_id = %parent_id, "reply chain loops back on itself");
                break;
            }

            match self.feed.get_post_by_id(&parent_id).await {
                Ok(Some(parent)) => {
                    current = parent;
                    depth += 1;
                }
                Ok(None) => {
                    debug!(tweet_id = %parent_id, "parent tweet not found");
                    break;
                }
                Err(e) => {
                    warn!(tweet_id = %parent_id, error = %e, "failed to fetch parent tweet");
                    break;
                }
            }
        }

        thread.into_iter().collect()
    }

    async fn remember(&self, tweet: &Tweet) {
        if let Err(e) = self.try_remember(tweet).await {
            warn!(tweet_id = %tweet.id, error = %e, "failed to record thread tweet");
        }
    }

    async fn try_remember(&self, tweet: &Tweet) -> Result<(), anyhow::Error> {
        let memory_id = memory_id_for(&tweet.id, self.agent_id);
        if self.store.get_memory_by_id(&memory_id).await?.is_some() {
            return Ok(());
        }

        let room_id = room_id_for(&tweet.conversation_id, self.agent_id);
        self.store.ensure_room(&room_id).await?;
        self.store.ensure_user(&tweet.user_id, &tweet.username).await?;
        self.store.ensure_participant(&tweet.user_id, &room_id).await?;
        self.store
            .create_memory(MemoryRecord {
                id: memory_id,
                user_id: tweet.user_id.clone(),
                room_id,
                text: tweet.text.clone(),
                in_reply_to: tweet
                    .in_reply_to_id
                    .as_deref()
                    .map(|id| memory_id_for(id, self.agent_id)),
                created_at: tweet.timestamp,
                metadata: json!({ "source": "twitter", "tweetId": tweet.id }),
            })
            .await
    }
}

/// Renders posts as prompt context, one line per post.
pub fn format_tweets(tweets: &[Tweet]) -> String {
    tweets
        .iter()
        .map(|tweet| {
            format!(
                "@{} ({}): {}",
                tweet.username,
                tweet.timestamp.format("%Y-%m-%d %H:%M"),
                tweet.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::content::ContentSelector;
use crate::core::thread::format_tweets;
use crate::core::traits::{read_json, write_json, Cache, Clock, ConversationStore, FeedClient, PromptContext};
use crate::memory::{last_post_key, timeline_key, tweet_key};
use crate::models::{memory_id_for, room_id_for, CachedTimeline, LastPost, MemoryRecord, SelectedContent, Tweet};

pub const FAILURE_BACKOFF_MINUTES: i64 = 5;
const TIMELINE_CONTEXT_SIZE: usize = 10;
const MAX_CACHED_TIMELINE: usize = 50;
pub const TIMELINE_CACHE_TTL_MINUTES: i64 = 30;

#[derive(Clone, Debug)]
pub struct PostSettings {
    pub username: String,
    pub agent_id: String,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub dry_run: bool,
    /// Overrides the flag given to `start` when set.
    pub post_immediately: Option<bool>,
}

/// Drives original posts on a jittered timer.
pub struct PostScheduler {
    settings: PostSettings,
    feed: Arc<dyn FeedClient>,
    cache: Arc<dyn Cache>,
    store: Arc<dyn ConversationStore>,
    selector: ContentSelector,
    base_context: PromptContext,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    last_post_time: Option<DateTime<Utc>>,
}

impl PostScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: PostSettings,
        feed: Arc<dyn FeedClient>,
        cache: Arc<dyn Cache>,
        store: Arc<dyn ConversationStore>,
        selector: ContentSelector,
        base_context: PromptContext,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        PostScheduler {
            settings,
            feed,
            cache,
            store,
            selector,
            base_context,
            clock,
            rng,
            last_post_time: None,
        }
    }

    pub fn last_post_time(&self) -> Option<DateTime<Utc>> {
        self.last_post_time
    }

    /// Runs until `cancel` fires. The loop never dies on an error; it backs
    /// off for a few minutes and carries on.
    pub async fn start(&mut self, post_immediately: bool, cancel: CancellationToken) {
        self.restore().await;

        if self.settings.post_immediately.unwrap_or(post_immediately) {
            if let Err(e) = self.generate_new_post().await {
                error!(error = %e, "immediate post failed");
            }
        }

        loop {
            let wait = match self.tick().await {
                Ok(delay) => {
                    info!(minutes = delay.num_minutes(), "next post check scheduled");
                    delay
                }
                Err(e) => {
                    error!(error = %e, "post loop iteration failed, backing off");
                    Duration::minutes(FAILURE_BACKOFF_MINUTES)
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("post scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(wait.to_std().unwrap_or_default()) => {}
            }
        }
    }

    /// Loads the persisted last-post time so a restart keeps the cadence.
    pub async fn restore(&mut self) {
        match read_json::<LastPost>(self.cache.as_ref(), &last_post_key(&self.settings.username)).await {
            Ok(Some(last)) => {
                debug!(timestamp = %last.timestamp, "restored last post time");
                self.last_post_time = Some(last.timestamp);
            }
            Ok(None) => debug!("no previous post recorded"),
            Err(e) => warn!(error = %e, "failed to read last post time"),
        }
    }

    /// Uniform over the inclusive range, at one-second granularity.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.settings.min_delay.num_seconds();
        let max = self.settings.max_delay.num_seconds().max(min);
        Duration::seconds(self.rng.gen_range(min..=max))
    }

    /// One loop iteration: posts if the drawn delay has elapsed since the
    /// last post, and returns that delay as the wait until the next check.
    pub async fn tick(&mut self) -> Result<Duration, anyhow::Error> {
        let delay = self.next_delay();
        let due = match self.last_post_time {
            Some(last) => self.clock.now() - last >= delay,
            None => true,
        };
        if due {
            self.generate_new_post().await?;
        }
        Ok(delay)
    }

    /// Posting borrows the scheduler mutably, so at most one post is in
    /// flight at a time.
    pub async fn generate_new_post(&mut self) -> Result<Option<Tweet>, anyhow::Error> {
        self.post_once().await
    }

    async fn post_once(&mut self) -> Result<Option<Tweet>, anyhow::Error> {
        let context = self.build_context().await;
        let content = self.selector.select_content(&context).await?;

        if content.text.is_empty() {
            warn!("generated post is empty, skipping");
            return Ok(None);
        }
        if self.settings.dry_run {
            info!(text = %content.text, special = content.is_special, "dry run: would have posted");
            return Ok(None);
        }

        let result = self.feed.send_post(&content.text, None).await?;
        let now = self.clock.now();
        self.last_post_time = Some(now);

        let tweet = Tweet {
            conversation_id: result.conversation_id.clone().unwrap_or_else(|| result.id.clone()),
            user_id: self.settings.agent_id.clone(),
            username: self.settings.username.clone(),
            text: result.text.clone(),
            in_reply_to_id: None,
            timestamp: result.created_at.unwrap_or(now),
            id: result.id,
        };

        self.cache_tweet(&tweet).await?;
        write_json(
            self.cache.as_ref(),
            &last_post_key(&self.settings.username),
            &LastPost {
                id: tweet.id.clone(),
                timestamp: now,
                is_special_interaction: content.is_special,
                special_interaction_type: content.special_type.clone(),
            },
        )
        .await?;
        self.remember(&tweet, &content).await?;

        info!(tweet_id = %tweet.id, special = content.is_special, "posted new tweet");
        Ok(Some(tweet))
    }

    async fn build_context(&self) -> PromptContext {
        let timeline = match self.timeline().await {
            Ok(timeline) => timeline,
            Err(e) => {
                warn!(error = %e, "failed to load timeline context");
                Vec::new()
            }
        };
        let mut context = self.base_context.clone();
        context.insert(
            "timeline".to_string(),
            format_tweets(&timeline[..timeline.len().min(TIMELINE_CONTEXT_SIZE)]),
        );
        context
    }

    /// Serves the cached timeline while it is younger than the TTL, otherwise
    /// refetches. A failed refetch falls back to the stale copy. Dry runs
    /// never write the cache.
    async fn timeline(&self) -> Result<Vec<Tweet>, anyhow::Error> {
        let key = timeline_key(&self.settings.username);
        let now = self.clock.now();
        let cached = match read_json::<CachedTimeline>(self.cache.as_ref(), &key).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable cached timeline");
                None
            }
        };
        if let Some(cached) = &cached {
            if now - cached.fetched_at < Duration::minutes(TIMELINE_CACHE_TTL_MINUTES) {
                return Ok(cached.tweets.clone());
            }
        }

        let tweets = match self.feed.fetch_timeline(TIMELINE_CONTEXT_SIZE).await {
            Ok(tweets) => tweets,
            Err(e) => match cached {
                Some(stale) => {
                    warn!(error = %e, "timeline fetch failed, using stale copy");
                    return Ok(stale.tweets);
                }
                None => return Err(e),
            },
        };
        debug!(count = tweets.len(), "refreshed timeline context");

        if !self.settings.dry_run {
            let fresh = CachedTimeline {
                fetched_at: now,
                tweets: tweets.clone(),
            };
            if let Err(e) = write_json(self.cache.as_ref(), &key, &fresh).await {
                warn!(error = %e, "failed to cache timeline");
            }
        }
        Ok(tweets)
    }

    /// Prepends the post to the cached timeline without touching its fetch
    /// stamp. With nothing cached yet the entry starts out expired.
    async fn cache_tweet(&self, tweet: &Tweet) -> Result<(), anyhow::Error> {
        let key = timeline_key(&self.settings.username);
        let mut timeline = read_json::<CachedTimeline>(self.cache.as_ref(), &key)
            .await
            .ok()
            .flatten()
            .unwrap_or(CachedTimeline {
                fetched_at: DateTime::<Utc>::MIN_UTC,
                tweets: Vec::new(),
            });
        timeline.tweets.insert(0, tweet.clone());
        timeline.tweets.truncate(MAX_CACHED_TIMELINE);
        write_json(self.cache.as_ref(), &key, &timeline).await?;
        write_json(self.cache.as_ref(), &tweet_key(&tweet.id), tweet).await
    }

    async fn remember(&self, tweet: &Tweet, content: &SelectedContent) -> Result<(), anyhow::Error> {
        let room_id = room_id_for(&tweet.conversation_id, &self.settings.agent_id);
        self.store.ensure_room(&room_id).await?;
        self.store
            .ensure_user(&self.settings.agent_id, &self.settings.username)
            .await?;
        self.store
            .ensure_participant(&self.settings.agent_id, &room_id)
            .await?;
        self.store
            .create_memory(MemoryRecord {
                id: memory_id_for(&tweet.id, &self.settings.agent_id),
                user_id: self.settings.agent_id.clone(),
                room_id,
                text: tweet.text.clone(),
                in_reply_to: None,
                created_at: tweet.timestamp,
                metadata: json!({
                    "source": "twitter",
                    "tweetId": tweet.id,
                    "isSpecialInteraction": content.is_special,
                    "specialInteractionType": content.special_type,
                }),
            })
            .await
    }
}

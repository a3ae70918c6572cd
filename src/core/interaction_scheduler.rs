use std::collections::HashSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::content::format_post;
use crate::core::rate_limit::RateLimitTracker;
use crate::core::thread::{format_tweets, ThreadBuilder};
use crate::core::traits::{
    write_json, Cache, Clock, ConversationStore, FeedClient, GenerationPipeline, PromptContext,
};
use crate::memory::{last_checked_key, tweet_key};
use crate::models::{
    memory_id_for, room_id_for, InteractionLimits, MemoryRecord, ResponseDecision, Tweet,
};

pub const SHOULD_RESPOND_TEMPLATE: &str = "# About {{agentName}} (@{{twitterUserName}}):
{{persona}}

# Conversation so far:
{{formattedConversation}}

# Current post:
{{currentPost}}

# Task: Decide whether {{agentName}} should reply to the current post.
{{agentName}} should RESPOND to direct mentions, questions and requests.
{{agentName}} should IGNORE spam, unrelated or nonsensical posts.
{{agentName}} should STOP if asked to stop or if the conversation has run its course.
Answer with [RESPOND], [IGNORE] or [STOP].";

pub const REPLY_TEMPLATE: &str = "# About {{agentName}} (@{{twitterUserName}}):
{{persona}}

# Conversation so far:
{{formattedConversation}}

# Current post:
{{currentPost}}

# Task: Generate a reply in the voice, style and perspective of {{agentName}} (@{{twitterUserName}}).
Write only the reply text, nothing else. Stay under 280 characters.";

#[derive(Clone, Debug)]
pub struct InteractionSettings {
    pub username: String,
    pub agent_id: String,
    pub search_count: usize,
    pub max_thread_depth: usize,
    pub dry_run: bool,
    pub limits: InteractionLimits,
}

/// What happened to a single candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    RateLimited,
    NotSampled,
    Ignored,
    Stopped,
    Empty,
    DryRun,
    Replied,
}

/// Polls mentions on a fixed interval and replies to the ones that pass the
/// rate limits and the reply draw.
pub struct InteractionScheduler {
    settings: InteractionSettings,
    feed: Arc<dyn FeedClient>,
    cache: Arc<dyn Cache>,
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn GenerationPipeline>,
    tracker: RateLimitTracker,
    base_context: PromptContext,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    last_checked_id: Option<u64>,
}

impl InteractionScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: InteractionSettings,
        feed: Arc<dyn FeedClient>,
        cache: Arc<dyn Cache>,
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn GenerationPipeline>,
        base_context: PromptContext,
        clock: Arc<dyn Clock>,
        rng: StdRng,
    ) -> Self {
        let tracker = RateLimitTracker::new(&settings.limits, clock.clone());
        InteractionScheduler {
            settings,
            feed,
            cache,
            store,
            generator,
            tracker,
            base_context,
            clock,
            rng,
            last_checked_id: None,
        }
    }

    pub fn last_checked_id(&self) -> Option<u64> {
        self.last_checked_id
    }

    pub fn tracker(&self) -> &RateLimitTracker {
        &self.tracker
    }

    pub async fn start(&mut self, cancel: CancellationToken) {
        self.restore().await;
        let poll_interval = self
            .settings
            .limits
            .poll_interval
            .to_std()
            .unwrap_or_default();

        loop {
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "interaction poll failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("interaction scheduler stopped");
                    break;
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    pub async fn restore(&mut self) {
        match self.cache.get(&last_checked_key(&self.settings.username)).await {
            Ok(Some(raw)) => match raw.trim().parse::<u64>() {
                Ok(id) => self.last_checked_id = Some(id),
                Err(_) => warn!(value = %raw, "ignoring malformed checkpoint"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read checkpoint"),
        }
    }

    /// Fetches one batch, handles each new candidate in id order and persists
    /// the checkpoint. A failure on one candidate never aborts the batch.
    pub async fn poll_once(&mut self) -> Result<(), anyhow::Error> {
        self.tracker.cleanup_if_due();

        let mentions = self
            .feed
            .search_recent_mentions(&self.settings.username, self.settings.search_count)
            .await?;
        let candidates = self.prepare_candidates(mentions);
        debug!(count = candidates.len(), "fetched interaction candidates");

        for (id, candidate) in candidates {
            if self.last_checked_id.is_some_and(|last| id <= last) {
                continue;
            }

            match self.handle_candidate(&candidate).await {
                Ok(outcome) => {
                    debug!(tweet_id = %candidate.id, ?outcome, "handled candidate")
                }
                Err(e) => error!(tweet_id = %candidate.id, error = %e, "failed to handle candidate"),
            }
            self.last_checked_id = Some(id);
        }

        if let Some(id) = self.last_checked_id {
            self.cache
                .set(&last_checked_key(&self.settings.username), id.to_string())
                .await?;
        }
        Ok(())
    }

    /// Dedups by id, drops the agent's own posts and non-numeric ids, and
    /// sorts ascending.
    fn prepare_candidates(&self, mentions: Vec<Tweet>) -> Vec<(u64, Tweet)> {
        let mut seen = HashSet::new();
        let mut candidates: Vec<(u64, Tweet)> = mentions
            .into_iter()
            .filter(|tweet| seen.insert(tweet.id.clone()))
            .filter(|tweet| !self.is_own(tweet))
            .filter_map(|tweet| match tweet.numeric_id() {
                Some(id) => Some((id, tweet)),
                None => {
                    warn!(tweet_id = %tweet.id, "skipping candidate with non-numeric id");
                    None
                }
            })
            .collect();
        candidates.sort_by_key(|(id, _)| *id);
        candidates
    }

    fn is_own(&self, tweet: &Tweet) -> bool {
        tweet.user_id == self.settings.agent_id
            || tweet.username.eq_ignore_ascii_case(&self.settings.username)
    }

    pub async fn handle_candidate(&mut self, candidate: &Tweet) -> Result<CandidateOutcome, anyhow::Error> {
        if !self.tracker.can_reply_to_user(&candidate.user_id)
            || !self.tracker.can_reply_in_thread(&candidate.conversation_id)
        {
            debug!(tweet_id = %candidate.id, user = %candidate.username, "rate limited, skipping");
            return Ok(CandidateOutcome::RateLimited);
        }
        if self.rng.gen::<f64>() >= self.settings.limits.reply_probability {
            debug!(tweet_id = %candidate.id, "reply draw failed, skipping");
            return Ok(CandidateOutcome::NotSampled);
        }

        let thread = ThreadBuilder::new(self.feed.as_ref(), self.store.as_ref(), &self.settings.agent_id)
            .build_thread(candidate, self.settings.max_thread_depth)
            .await;

        let outcome = self.respond(candidate, &thread).await?;
        if outcome == CandidateOutcome::Replied {
            self.tracker
                .record_reply(&candidate.user_id, &candidate.conversation_id);
        }
        Ok(outcome)
    }

    async fn respond(&self, candidate: &Tweet, thread: &[Tweet]) -> Result<CandidateOutcome, anyhow::Error> {
        let mut context = self.base_context.clone();
        context.insert("formattedConversation".to_string(), format_tweets(thread));
        context.insert(
            "currentPost".to_string(),
            format!("@{}: {}", candidate.username, candidate.text),
        );

        let decision_prompt = self.generator.compose_prompt(SHOULD_RESPOND_TEMPLATE, &context);
        match self.generator.should_respond(&decision_prompt).await? {
            ResponseDecision::Respond => {}
            ResponseDecision::Ignore => {
                info!(tweet_id = %candidate.id, "decided to ignore tweet");
                return Ok(CandidateOutcome::Ignored);
            }
            ResponseDecision::Stop => {
                info!(tweet_id = %candidate.id, "decided to stop responding");
                return Ok(CandidateOutcome::Stopped);
            }
        }

        let reply_prompt = self.generator.compose_prompt(REPLY_TEMPLATE, &context);
        let reply = format_post(&self.generator.generate_text(&reply_prompt).await?);
        if reply.is_empty() {
            warn!(tweet_id = %candidate.id, "generated reply is empty");
            return Ok(CandidateOutcome::Empty);
        }
        if self.settings.dry_run {
            info!(tweet_id = %candidate.id, text = %reply, "dry run: would have replied");
            return Ok(CandidateOutcome::DryRun);
        }

        let result = self.feed.send_post(&reply, Some(&candidate.id)).await?;
        let sent = Tweet {
            conversation_id: result
                .conversation_id
                .clone()
                .unwrap_or_else(|| candidate.conversation_id.clone()),
            user_id: self.settings.agent_id.clone(),
            username: self.settings.username.clone(),
            text: result.text.clone(),
            in_reply_to_id: Some(candidate.id.clone()),
            timestamp: result.created_at.unwrap_or_else(|| self.clock.now()),
            id: result.id,
        };
        info!(tweet_id = %candidate.id, reply_id = %sent.id, "replied to tweet");

        if let Err(e) = self.remember_reply(&sent).await {
            warn!(reply_id = %sent.id, error = %e, "failed to record reply");
        }
        Ok(CandidateOutcome::Replied)
    }

    async fn remember_reply(&self, sent: &Tweet) -> Result<(), anyhow::Error> {
        write_json(self.cache.as_ref(), &tweet_key(&sent.id), sent).await?;

        let agent_id = &self.settings.agent_id;
        let room_id = room_id_for(&sent.conversation_id, agent_id);
        self.store.ensure_room(&room_id).await?;
        self.store.ensure_participant(agent_id, &room_id).await?;
        self.store
            .create_memory(MemoryRecord {
                id: memory_id_for(&sent.id, agent_id),
                user_id: agent_id.clone(),
                room_id,
                text: sent.text.clone(),
                in_reply_to: sent
                    .in_reply_to_id
                    .as_deref()
                    .map(|id| memory_id_for(id, agent_id)),
                created_at: sent.timestamp,
                metadata: json!({ "source": "twitter", "tweetId": sent.id }),
            })
            .await
    }
}

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    character::CharacterConfig,
    config::Settings,
    core::content::ContentSelector,
    core::interaction_scheduler::{InteractionScheduler, InteractionSettings},
    core::post_scheduler::{PostScheduler, PostSettings},
    core::send_queue::SendQueue,
    core::traits::{Cache, Clock, ConversationStore, FeedClient, GenerationPipeline},
};

/// Owns the collaborators and runs both schedulers side by side on one task.
pub struct Runtime {
    settings: Settings,
    character: CharacterConfig,
    agent_id: String,
    feed: Arc<dyn FeedClient>,
    cache: Arc<dyn Cache>,
    store: Arc<dyn ConversationStore>,
    generator: Arc<dyn GenerationPipeline>,
    clock: Arc<dyn Clock>,
}

impl Runtime {
    /// All sends from both schedulers go through one `SendQueue`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        character: CharacterConfig,
        agent_id: &str,
        feed: Arc<dyn FeedClient>,
        cache: Arc<dyn Cache>,
        store: Arc<dyn ConversationStore>,
        generator: Arc<dyn GenerationPipeline>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Runtime {
            settings,
            character,
            agent_id: agent_id.to_string(),
            feed: Arc::new(SendQueue::new(feed)),
            cache,
            store,
            generator,
            clock,
        }
    }

    pub fn post_scheduler(&self) -> PostScheduler {
        let selector = ContentSelector::new(
            self.settings.special_interactions.clone(),
            self.settings.special_interaction_cooldown,
            self.generator.clone(),
            self.clock.clone(),
            StdRng::from_entropy(),
        );
        PostScheduler::new(
            PostSettings {
                username: self.settings.username.clone(),
                agent_id: self.agent_id.clone(),
                min_delay: self.settings.post_interval_min,
                max_delay: self.settings.post_interval_max,
                dry_run: self.settings.dry_run,
                post_immediately: self.settings.post_immediately,
            },
            self.feed.clone(),
            self.cache.clone(),
            self.store.clone(),
            selector,
            self.character.prompt_context(&self.settings.username),
            self.clock.clone(),
            StdRng::from_entropy(),
        )
    }

    pub fn interaction_scheduler(&self) -> InteractionScheduler {
        InteractionScheduler::new(
            InteractionSettings {
                username: self.settings.username.clone(),
                agent_id: self.agent_id.clone(),
                search_count: self.settings.search_count,
                max_thread_depth: self.settings.max_thread_depth,
                dry_run: self.settings.dry_run,
                limits: self.settings.limits.clone(),
            },
            self.feed.clone(),
            self.cache.clone(),
            self.store.clone(),
            self.generator.clone(),
            self.character.prompt_context(&self.settings.username),
            self.clock.clone(),
            StdRng::from_entropy(),
        )
    }

    /// Returns once `cancel` fires and both loops have wound down.
    pub async fn run_periodically(&self, post_immediately: bool, cancel: CancellationToken) {
        info!("=== Starting agent ===");
        info!(character = %self.character.name, username = %self.settings.username, "identity");
        info!(
            dry_run = self.settings.dry_run,
            min_minutes = self.settings.post_interval_min.num_minutes(),
            max_minutes = self.settings.post_interval_max.num_minutes(),
            poll_seconds = self.settings.limits.poll_interval.num_seconds(),
            special_interactions = self.settings.special_interactions.len(),
            "scheduling"
        );

        let mut posts = self.post_scheduler();
        let mut interactions = self.interaction_scheduler();
        tokio::join!(
            posts.start(post_immediately, cancel.clone()),
            interactions.start(cancel.clone()),
        );
        info!("=== Agent stopped ===");
    }
}

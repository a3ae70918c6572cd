use std::env;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use social_agent::character::load_character_config;
use social_agent::config::Settings;
use social_agent::core::{agent::Agent, runtime::Runtime, traits::{Cache, SystemClock}};
use social_agent::memory::{FileCache, FileConversationStore};
use social_agent::providers::{redis::RedisCache, twitter::Twitter};

fn required(key: &str) -> Result<String, anyhow::Error> {
    env::var(key).with_context(|| format!("{} not set", key))
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let env_loaded = dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "social_agent=info".into()),
        )
        .init();

    if let Err(e) = env_loaded {
        warn!(error = %e, "no .env file loaded");
    }

    let settings = Settings::from_env()?;
    let character = load_character_config()?;

    let twitter = Arc::new(Twitter::new(
        &required("TWITTER_CONSUMER_KEY")?,
        &required("TWITTER_CONSUMER_SECRET")?,
        &required("TWITTER_ACCESS_TOKEN")?,
        &required("TWITTER_ACCESS_TOKEN_SECRET")?,
    ));
    let agent_id = twitter
        .get_user_id()
        .await
        .context("failed to resolve the agent's twitter id")?;

    let cache: Arc<dyn Cache> = match &settings.redis_url {
        Some(url) => Arc::new(RedisCache::connect(url).await?),
        None => Arc::new(FileCache::open(&settings.storage_dir)?),
    };
    let store = Arc::new(FileConversationStore::open(&settings.storage_dir)?);
    let agent = Arc::new(Agent::new(&required("ANTHROPIC_API_KEY")?, &character.prompt));

    let runtime = Runtime::new(
        settings,
        character,
        &agent_id,
        twitter,
        cache,
        store,
        agent,
        Arc::new(SystemClock),
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for ctrl-c"),
        }
    });

    runtime.run_periodically(false, cancel).await;
    Ok(())
}

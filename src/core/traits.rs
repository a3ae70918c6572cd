use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use crate::models::{MemoryRecord, ResponseDecision, SendResult, Tweet};

/// Values handed to prompt templates, keyed by placeholder name.
pub type PromptContext = HashMap<String, String>;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn set(&self, key: &str, value: String) -> Result<(), anyhow::Error>;
}

pub async fn read_json<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &str,
) -> Result<Option<T>, anyhow::Error> {
    match cache.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn write_json<T: Serialize + ?Sized>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
) -> Result<(), anyhow::Error> {
    cache.set(key, serde_json::to_string(value)?).await
}

#[async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch_timeline(&self, count: usize) -> Result<Vec<Tweet>, anyhow::Error>;

    async fn search_recent_mentions(
        &self,
        handle: &str,
        count: usize,
    ) -> Result<Vec<Tweet>, anyhow::Error>;

    async fn send_post(
        &self,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> Result<SendResult, anyhow::Error>;

    /// `Ok(None)` when the post does not exist (deleted, protected, never was).
    async fn get_post_by_id(&self, id: &str) -> Result<Option<Tweet>, anyhow::Error>;
}

#[async_trait]
pub trait GenerationPipeline: Send + Sync {
    /// Fills `{{key}}` placeholders from the context. Unknown placeholders are
    /// left in place.
    fn compose_prompt(&self, template: &str, context: &PromptContext) -> String {
        context.iter().fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{{{}}}}}", key), value)
        })
    }

    async fn generate_text(&self, prompt: &str) -> Result<String, anyhow::Error>;

    async fn should_respond(&self, prompt: &str) -> Result<ResponseDecision, anyhow::Error>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn ensure_user(&self, user_id: &str, username: &str) -> Result<(), anyhow::Error>;
    async fn ensure_room(&self, room_id: &str) -> Result<(), anyhow::Error>;
    async fn ensure_participant(&self, user_id: &str, room_id: &str) -> Result<(), anyhow::Error>;
    async fn create_memory(&self, memory: MemoryRecord) -> Result<(), anyhow::Error>;
    async fn get_memory_by_id(&self, id: &str) -> Result<Option<MemoryRecord>, anyhow::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl GenerationPipeline for Echo {
        async fn generate_text(&self, prompt: &str) -> Result<String, anyhow::Error> {
            Ok(prompt.to_string())
        }

        async fn should_respond(&self, _prompt: &str) -> Result<ResponseDecision, anyhow::Error> {
            Ok(ResponseDecision::Respond)
        }
    }

    #[test]
    fn test_compose_prompt_fills_known_placeholders() {
        let mut context = PromptContext::new();
        context.insert("name".to_string(), "agent".to_string());
        let prompt = Echo.compose_prompt("hi {{name}}, {{missing}}", &context);
        assert_eq!(prompt, "hi agent, {{missing}}");
    }
}

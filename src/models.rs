use serde::{Serialize, Deserialize};
use chrono::{DateTime, Duration, Utc};

/// A post fetched from the feed. Treated as immutable once fetched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tweet {
    pub id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Tweet {
    /// Snowflake ids compare numerically, never lexically.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.parse::<u64>().ok()
    }
}

/// What the feed hands back after a successful send.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SendResult {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseDecision {
    Respond,
    Ignore,
    Stop,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SpecialInteraction {
    pub handle: String,
    #[serde(default)]
    pub topics: Vec<String>,
    pub templates: Vec<String>,
    pub probability: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InteractionState {
    pub last_triggered_at: DateTime<Utc>,
}

/// Output of content selection, already post-processed.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectedContent {
    pub text: String,
    pub is_special: bool,
    pub special_type: Option<String>,
}

impl SelectedContent {
    pub fn generated(text: String) -> Self {
        SelectedContent {
            text,
            is_special: false,
            special_type: None,
        }
    }
}

/// Persisted after every real post so the cadence survives restarts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastPost {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub is_special_interaction: bool,
    #[serde(default)]
    pub special_interaction_type: Option<String>,
}

/// Timeline snapshot kept in the cache, stamped with when it was fetched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedTimeline {
    pub fetched_at: DateTime<Utc>,
    pub tweets: Vec<Tweet>,
}

#[derive(Clone, Debug)]
pub struct InteractionLimits {
    pub max_replies_per_thread: u32,
    pub max_replies_per_user: u32,
    pub min_time_between_replies: Duration,
    pub poll_interval: Duration,
    pub reply_probability: f64,
}

impl Default for InteractionLimits {
    fn default() -> Self {
        InteractionLimits {
            max_replies_per_thread: 3,
            max_replies_per_user: 5,
            min_time_between_replies: Duration::minutes(5),
            poll_interval: Duration::seconds(120),
            reply_probability: 1.0,
        }
    }
}

/// A record in the conversation store.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: String,
    pub user_id: String,
    pub room_id: String,
    pub text: String,
    #[serde(default)]
    pub in_reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

pub fn room_id_for(conversation_id: &str, agent_id: &str) -> String {
    format!("{}-{}", conversation_id, agent_id)
}

pub fn memory_id_for(tweet_id: &str, agent_id: &str) -> String {
    format!("{}-{}", tweet_id, agent_id)
}

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use reqwest_oauth1::{OAuthClientProvider, Secrets};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::core::traits::FeedClient;
use crate::models::{SendResult, Tweet};

const API_BASE: &str = "https://api.twitter.com/2";
const TWEET_FIELDS: &str = "author_id,conversation_id,created_at,referenced_tweets";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: Option<T>,
    #[serde(default)]
    includes: Option<Includes>,
}

#[derive(Debug, Deserialize, Default)]
struct Includes {
    #[serde(default)]
    users: Vec<ApiUser>,
}

#[derive(Debug, Deserialize, Clone)]
struct ApiUser {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ReferencedTweet {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiTweet {
    id: String,
    text: String,
    #[serde(default)]
    author_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    referenced_tweets: Vec<ReferencedTweet>,
}

impl ApiTweet {
    fn into_tweet(self, users: &HashMap<String, String>) -> Tweet {
        let user_id = self.author_id.unwrap_or_default();
        let in_reply_to_id = self
            .referenced_tweets
            .into_iter()
            .find(|r| r.kind == "replied_to")
            .map(|r| r.id);
        Tweet {
            conversation_id: self.conversation_id.unwrap_or_else(|| self.id.clone()),
            username: users.get(&user_id).cloned().unwrap_or_default(),
            user_id,
            text: self.text,
            in_reply_to_id,
            timestamp: self.created_at.unwrap_or_else(Utc::now),
            id: self.id,
        }
    }
}

fn user_index(includes: Option<Includes>) -> HashMap<String, String> {
    includes
        .unwrap_or_default()
        .users
        .into_iter()
        .map(|u| (u.id, u.username))
        .collect()
}

/// Twitter API v2 over OAuth 1.0a user context.
pub struct Twitter {
    consumer_key: String,
    consumer_secret: String,
    access_token: String,
    access_token_secret: String,
    client: reqwest::Client,
    user_id: OnceCell<String>,
}

impl Twitter {
    pub fn new(
        consumer_key: &str,
        consumer_secret: &str,
        access_token: &str,
        access_token_secret: &str,
    ) -> Self {
        Twitter {
            consumer_key: consumer_key.to_string(),
            consumer_secret: consumer_secret.to_string(),
            access_token: access_token.to_string(),
            access_token_secret: access_token_secret.to_string(),
            client: reqwest::Client::new(),
            user_id: OnceCell::new(),
        }
    }

    fn secrets(&self) -> Secrets<'_> {
        Secrets::new(self.consumer_key.as_str(), self.consumer_secret.as_str())
            .token(self.access_token.as_str(), self.access_token_secret.as_str())
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        debug!(url, "twitter GET");
        let response = self
            .client
            .clone()
            .oauth1(self.secrets())
            .get(url)
            .query(query)
            .send()
            .await?;
        Ok(response)
    }

    async fn read<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow::anyhow!("twitter request failed with status {}: {}", status, body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Numeric id of the authenticated account, fetched once.
    pub async fn get_user_id(&self) -> Result<String> {
        self.user_id
            .get_or_try_init(|| async {
                let response = self.get(&format!("{}/users/me", API_BASE), &[]).await?;
                let me: ApiResponse<ApiUser> = Self::read(response).await?;
                me.data
                    .map(|user| user.id)
                    .ok_or_else(|| anyhow::anyhow!("twitter returned no user for /users/me"))
            })
            .await
            .cloned()
    }

    async fn list(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<Tweet>> {
        let response = self.get(url, query).await?;
        let page: ApiResponse<Vec<ApiTweet>> = Self::read(response).await?;
        let users = user_index(page.includes);
        Ok(page
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.into_tweet(&users))
            .collect())
    }

    fn list_query(count: usize) -> Vec<(&'static str, String)> {
        vec![
            ("max_results", count.clamp(10, 100).to_string()),
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("expansions", "author_id".to_string()),
            ("user.fields", "username".to_string()),
        ]
    }
}

#[async_trait]
impl FeedClient for Twitter {
    async fn fetch_timeline(&self, count: usize) -> Result<Vec<Tweet>> {
        let user_id = self.get_user_id().await?;
        let url = format!("{}/users/{}/timelines/reverse_chronological", API_BASE, user_id);
        let mut tweets = self.list(&url, &Self::list_query(count)).await?;
        tweets.truncate(count);
        Ok(tweets)
    }

    async fn search_recent_mentions(&self, handle: &str, count: usize) -> Result<Vec<Tweet>> {
        let url = format!("{}/tweets/search/recent", API_BASE);
        let mut query = Self::list_query(count);
        query.push(("query", format!("@{}", handle.trim_start_matches('@'))));
        let mut tweets = self.list(&url, &query).await?;
        tweets.truncate(count);
        Ok(tweets)
    }

    async fn send_post(&self, text: &str, in_reply_to: Option<&str>) -> Result<SendResult> {
        let mut body = json!({ "text": text });
        if let Some(parent) = in_reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": parent });
        }

        let response = self
            .client
            .clone()
            .oauth1(self.secrets())
            .post(format!("{}/tweets", API_BASE))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;

        #[derive(Deserialize)]
        struct Created {
            id: String,
            text: String,
        }
        let created: ApiResponse<Created> = Self::read(response).await?;
        let created = created
            .data
            .ok_or_else(|| anyhow::anyhow!("twitter accepted the post but returned no data"))?;
        Ok(SendResult {
            id: created.id,
            text: created.text,
            conversation_id: None,
            created_at: None,
        })
    }

    async fn get_post_by_id(&self, id: &str) -> Result<Option<Tweet>> {
        let url = format!("{}/tweets/{}", API_BASE, id);
        let query = [
            ("tweet.fields", TWEET_FIELDS.to_string()),
            ("expansions", "author_id".to_string()),
            ("user.fields", "username".to_string()),
        ];
        let response = self.get(&url, &query).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let single: ApiResponse<ApiTweet> = Self::read(response).await?;
        let users = user_index(single.includes);
        Ok(single.data.map(|t| t.into_tweet(&users)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_tweet_conversion_picks_reply_parent() {
        let raw = r#"{
            "data": [{
                "id": "20",
                "text": "@agent hello",
                "author_id": "7",
                "conversation_id": "10",
                "created_at": "2024-01-01T00:00:00Z",
                "referenced_tweets": [
                    {"type": "quoted", "id": "5"},
                    {"type": "replied_to", "id": "10"}
                ]
            }],
            "includes": {"users": [{"id": "7", "username": "someone"}]}
        }"#;
        let page: ApiResponse<Vec<ApiTweet>> = serde_json::from_str(raw).unwrap();
        let users = user_index(page.includes);
        let tweet = page.data.unwrap().remove(0).into_tweet(&users);

        assert_eq!(tweet.id, "20");
        assert_eq!(tweet.username, "someone");
        assert_eq!(tweet.conversation_id, "10");
        assert_eq!(tweet.in_reply_to_id.as_deref(), Some("10"));
    }

    #[test]
    fn test_api_tweet_without_optional_fields() {
        let raw = r#"{"data": {"id": "3", "text": "root"}}"#;
        let single: ApiResponse<ApiTweet> = serde_json::from_str(raw).unwrap();
        let tweet = single.data.unwrap().into_tweet(&HashMap::new());
        assert_eq!(tweet.conversation_id, "3");
        assert!(tweet.in_reply_to_id.is_none());
    }
}

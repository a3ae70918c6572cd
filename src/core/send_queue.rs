use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::traits::FeedClient;
use crate::models::{SendResult, Tweet};

/// Serializes sends through one fair lock: submitted sends run one at a time
/// in submission order. Reads pass straight through.
pub struct SendQueue {
    inner: Arc<dyn FeedClient>,
    send_lock: Mutex<()>,
}

impl SendQueue {
    pub fn new(inner: Arc<dyn FeedClient>) -> Self {
        SendQueue {
            inner,
            send_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl FeedClient for SendQueue {
    async fn fetch_timeline(&self, count: usize) -> Result<Vec<Tweet>, anyhow::Error> {
        self.inner.fetch_timeline(count).await
    }

    async fn search_recent_mentions(
        &self,
        handle: &str,
        count: usize,
    ) -> Result<Vec<Tweet>, anyhow::Error> {
        self.inner.search_recent_mentions(handle, count).await
    }

    async fn send_post(
        &self,
        text: &str,
        in_reply_to: Option<&str>,
    ) -> Result<SendResult, anyhow::Error> {
        let _guard = self.send_lock.lock().await;
        self.inner.send_post(text, in_reply_to).await
    }

    async fn get_post_by_id(&self, id: &str) -> Result<Option<Tweet>, anyhow::Error> {
        self.inner.get_post_by_id(id).await
    }
}

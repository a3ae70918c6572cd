use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::core::traits::{Cache, ConversationStore};
use crate::models::MemoryRecord;

pub fn timeline_key(username: &str) -> String {
    format!("twitter/{}/timeline", username)
}

pub fn tweet_key(tweet_id: &str) -> String {
    format!("twitter/tweets/{}", tweet_id)
}

pub fn last_post_key(username: &str) -> String {
    format!("twitter/{}/lastPost", username)
}

pub fn last_checked_key(username: &str) -> String {
    format!("twitter/{}/lastCheckedTweetId", username)
}

fn load_json<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> io::Result<T> {
    if path.exists() {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    } else {
        Ok(T::default())
    }
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let data = serde_json::to_string_pretty(value)?;
    let mut file = fs::File::create(path)?;
    file.write_all(data.as_bytes())?;
    Ok(())
}

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), anyhow::Error> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Key-value cache kept as one pretty-printed JSON object on disk.
pub struct FileCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileCache {
    const FILE_NAME: &'static str = "cache.json";

    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let path = dir.as_ref().join(Self::FILE_NAME);
        let entries = load_json(&path)?;
        Ok(FileCache {
            path,
            entries: Mutex::new(entries),
        })
    }
}

#[async_trait]
impl Cache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), anyhow::Error> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        save_json(&self.path, &*entries)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct Conversations {
    pub users: BTreeMap<String, String>,
    pub rooms: BTreeSet<String>,
    pub participants: BTreeSet<(String, String)>,
    pub memories: BTreeMap<String, MemoryRecord>,
}

impl Conversations {
    fn ensure_user(&mut self, user_id: &str, username: &str) {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| username.to_string());
    }

    fn ensure_participant(&mut self, user_id: &str, room_id: &str) {
        self.rooms.insert(room_id.to_string());
        self.participants
            .insert((user_id.to_string(), room_id.to_string()));
    }

    fn create_memory(&mut self, memory: MemoryRecord) {
        self.memories.entry(memory.id.clone()).or_insert(memory);
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: Mutex<Conversations>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Conversations {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn ensure_user(&self, user_id: &str, username: &str) -> Result<(), anyhow::Error> {
        self.inner.lock().await.ensure_user(user_id, username);
        Ok(())
    }

    async fn ensure_room(&self, room_id: &str) -> Result<(), anyhow::Error> {
        self.inner.lock().await.rooms.insert(room_id.to_string());
        Ok(())
    }

    async fn ensure_participant(&self, user_id: &str, room_id: &str) -> Result<(), anyhow::Error> {
        self.inner.lock().await.ensure_participant(user_id, room_id);
        Ok(())
    }

    async fn create_memory(&self, memory: MemoryRecord) -> Result<(), anyhow::Error> {
        self.inner.lock().await.create_memory(memory);
        Ok(())
    }

    async fn get_memory_by_id(&self, id: &str) -> Result<Option<MemoryRecord>, anyhow::Error> {
        Ok(self.inner.lock().await.memories.get(id).cloned())
    }
}

/// Conversation store persisted to `conversations.json` after every write.
pub struct FileConversationStore {
    path: PathBuf,
    inner: Mutex<Conversations>,
}

impl FileConversationStore {
    const FILE_NAME: &'static str = "conversations.json";

    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let path = dir.as_ref().join(Self::FILE_NAME);
        let inner = load_json(&path)?;
        Ok(FileConversationStore {
            path,
            inner: Mutex::new(inner),
        })
    }

    async fn update<F: FnOnce(&mut Conversations)>(&self, f: F) -> Result<(), anyhow::Error> {
        let mut inner = self.inner.lock().await;
        f(&mut inner);
        save_json(&self.path, &*inner)?;
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn ensure_user(&self, user_id: &str, username: &str) -> Result<(), anyhow::Error> {
        self.update(|c| c.ensure_user(user_id, username)).await
    }

    async fn ensure_room(&self, room_id: &str) -> Result<(), anyhow::Error> {
        self.update(|c| {
            c.rooms.insert(room_id.to_string());
        })
        .await
    }

    async fn ensure_participant(&self, user_id: &str, room_id: &str) -> Result<(), anyhow::Error> {
        self.update(|c| c.ensure_participant(user_id, room_id)).await
    }

    async fn create_memory(&self, memory: MemoryRecord) -> Result<(), anyhow::Error> {
        self.update(|c| c.create_memory(memory)).await
    }

    async fn get_memory_by_id(&self, id: &str) -> Result<Option<MemoryRecord>, anyhow::Error> {
        Ok(self.inner.lock().await.memories.get(id).cloned())
    }
}

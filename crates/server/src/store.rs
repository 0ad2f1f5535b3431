//! File-backed conversation store.
//!
//! All conversations live in memory and are written to
//! `{data_dir}/conversations.json` after every change. Ids are generated
//! here, so a client-supplied id never reaches the filesystem.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use relay_core::RelayError;
use relay_tool_runtime::{MessageStore, Role, StoreError};

const STORE_FILE: &str = "conversations.json";
const TITLE_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConversation {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<StoredMessage>,
}

pub struct ConversationStore {
    path: PathBuf,
    conversations: RwLock<HashMap<String, StoredConversation>>,
}

impl ConversationStore {
    /// Open the store under `data_dir`, loading any existing conversations.
    pub async fn open(data_dir: &Path) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;

        let path = data_dir.join(STORE_FILE);
        let conversations: HashMap<String, StoredConversation> = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        info!(count = conversations.len(), path = %path.display(), "Conversation store opened");
        Ok(Self {
            path,
            conversations: RwLock::new(conversations),
        })
    }

    /// Create an empty conversation titled after its first message.
    pub async fn create_conversation(&self, first_message: &str) -> Result<String, RelayError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let conversation = StoredConversation {
            id: id.clone(),
            title: first_message.chars().take(TITLE_CHARS).collect(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        };

        let mut conversations = self.conversations.write().await;
        conversations.insert(id.clone(), conversation);
        if let Err(e) = self.persist(&conversations).await {
            conversations.remove(&id);
            return Err(e);
        }
        debug!(conversation_id = %id, "Conversation created");
        Ok(id)
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.conversations.read().await.contains_key(id)
    }

    /// Messages of a conversation in insertion order.
    pub async fn messages(&self, id: &str) -> Result<Vec<StoredMessage>, RelayError> {
        self.conversations
            .read()
            .await
            .get(id)
            .map(|c| c.messages.clone())
            .ok_or_else(|| RelayError::ConversationNotFound(id.to_string()))
    }

    /// Append messages to a conversation and persist them in one write.
    /// On a failed write the in-memory state is rolled back.
    async fn append(&self, id: &str, entries: &[(Role, &str)]) -> Result<(), RelayError> {
        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .get_mut(id)
            .ok_or_else(|| RelayError::ConversationNotFound(id.to_string()))?;
        let previous = conversation.clone();

        let now = Utc::now();
        conversation.messages.extend(entries.iter().map(|(role, content)| StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            role: *role,
            content: content.to_string(),
            created_at: now,
        }));
        conversation.updated_at = now;

        if let Err(e) = self.persist(&conversations).await {
            warn!(conversation_id = %id, error = %e, "Persist failed, rolling back");
            conversations.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    /// Write the whole map to a temp file, then rename over the store file.
    /// Callers hold the write lock.
    async fn persist(&self, conversations: &HashMap<String, StoredConversation>) -> Result<(), RelayError> {
        let json = serde_json::to_string_pretty(conversations)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

fn store_error(e: RelayError) -> StoreError {
    match e {
        RelayError::ConversationNotFound(id) => StoreError::NotFound(id),
        RelayError::Io(e) => StoreError::Io(e),
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl MessageStore for ConversationStore {
    async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<(), StoreError> {
        self.append(conversation_id, &[(role, content)]).await.map_err(store_error)
    }

    async fn append_exchange(&self, conversation_id: &str, user: &str, assistant: &str) -> Result<(), StoreError> {
        self.append(conversation_id, &[(Role::User, user), (Role::Assistant, assistant)])
            .await
            .map_err(store_error)
    }
}

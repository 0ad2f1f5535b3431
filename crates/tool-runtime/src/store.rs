use async_trait::async_trait;

use crate::conversation::Role;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conversation not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Backend(String),
}

/// Where the agentic loop appends the messages of a completed request.
///
/// Implementations own durability; the loop only guarantees that a
/// successful request appends its user and assistant message once each.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<(), StoreError>;

    /// Append a user message and its reply. Stores that can write both in
    /// one step override this.
    async fn append_exchange(&self, conversation_id: &str, user: &str, assistant: &str) -> Result<(), StoreError> {
        self.append_message(conversation_id, Role::User, user).await?;
        self.append_message(conversation_id, Role::Assistant, assistant).await
    }
}

/// In-memory store for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod memory {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStore {
        messages: Mutex<Vec<(String, Role, String)>>,
        fail: bool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// A store whose every append fails.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn messages(&self) -> Vec<(String, Role, String)> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageStore for MemoryStore {
        async fn append_message(&self, conversation_id: &str, role: Role, content: &str) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Backend("store unavailable".to_string()));
            }
            self.messages
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), role, content.to_string()));
            Ok(())
        }

        async fn append_exchange(&self, conversation_id: &str, user: &str, assistant: &str) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Backend("store unavailable".to_string()));
            }
            let mut messages = self.messages.lock().unwrap();
            messages.push((conversation_id.to_string(), Role::User, user.to_string()));
            messages.push((conversation_id.to_string(), Role::Assistant, assistant.to_string()));
            Ok(())
        }
    }
}

//! Session Map
//!
//! Remembers the CLI's own session id per conversation so continuation calls
//! can resume instead of replaying the whole history. The map lives only as
//! long as the gateway instance. Concurrent calls for the same conversation
//! race benignly: the last successful call's session id wins.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// Key a conversation by its instructions and first user message.
pub fn conversation_key(instructions: Option<&str>, first_user_message: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(instructions.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(first_user_message.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Conversation key → external session id. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct SessionMap {
    sessions: Arc<RwLock<HashMap<String, String>>>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: impl Into<String>, session_id: impl Into<String>) {
        self.sessions
            .write()
            .await
            .insert(key.into(), session_id.into());
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key() {
        let a = conversation_key(Some("be terse"), "hello");
        assert_eq!(a, conversation_key(Some("be terse"), "hello"));
        assert_ne!(a, conversation_key(Some("be verbose"), "hello"));
        assert_ne!(a, conversation_key(Some("be terse"), "goodbye"));
        // The separator keeps boundaries distinct.
        assert_ne!(conversation_key(Some("ab"), "c"), conversation_key(Some("a"), "bc"));
        assert_eq!(conversation_key(None, "x"), conversation_key(Some(""), "x"));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let map = SessionMap::new();
        let shared = map.clone();
        assert!(map.is_empty().await);
        map.insert("k", "s1").await;
        shared.insert("k", "s2").await;
        assert_eq!(map.get("k").await.as_deref(), Some("s2"));
        assert_eq!(map.len().await, 1);
        assert!(map.get("other").await.is_none());
    }
}

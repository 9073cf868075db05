//! Per-user conversation history on `chat:<user_id>` keys.
//!
//! Only user and assistant turns are persisted; the tool turns produced
//! inside a loop exist to ground the model's current answer and never enter
//! long-lived history. Old turns fall off the window — no summarization
//! pass runs on the dropped messages.

use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::llm::ChatMessage;
use crate::store::Store;

pub struct History {
    store: Arc<Store>,
    window: usize,
}

impl History {
    pub fn new(store: Arc<Store>, window: usize) -> Self {
        Self { store, window }
    }

    /// The stored conversation, oldest first. Read failures degrade to an
    /// empty history rather than failing the turn.
    pub async fn load(&self, user_id: &str) -> Vec<ChatMessage> {
        let entries = match self.store.lrange(&key_for(user_id), 0, self.window).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(user_id, err = %e, "history read failed, starting fresh");
                return Vec::new();
            }
        };
        let mut messages: Vec<ChatMessage> = entries
            .iter()
            .filter_map(|e| serde_json::from_str(e).ok())
            .collect();
        // Stored newest first; conversations read oldest first.
        messages.reverse();
        messages
    }

    /// Append one turn, trimming to the window.
    pub async fn append(&self, user_id: &str, message: &ChatMessage) -> Result<()> {
        let encoded = serde_json::to_string(message)?;
        self.store
            .lpush_trim(&key_for(user_id), &encoded, self.window)
            .await
    }
}

fn key_for(user_id: &str) -> String {
    format!("chat:{user_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let history = History::new(store, 10);

        history.append("u1", &ChatMessage::user("first")).await.unwrap();
        history.append("u1", &ChatMessage::assistant("second")).await.unwrap();
        history.append("u1", &ChatMessage::user("third")).await.unwrap();

        let messages = history.load("u1").await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].content, "third");
    }

    #[tokio::test]
    async fn window_drops_oldest_turns() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let history = History::new(store, 3);
        for i in 0..5 {
            history
                .append("u1", &ChatMessage::user(format!("msg-{i}")))
                .await
                .unwrap();
        }
        let messages = history.load("u1").await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "msg-2");
        assert_eq!(messages[2].content, "msg-4");
    }

    #[tokio::test]
    async fn histories_are_per_user() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let history = History::new(store, 10);
        history.append("u1", &ChatMessage::user("mine")).await.unwrap();
        assert!(history.load("u2").await.is_empty());
    }

    #[tokio::test]
    async fn broken_store_reads_as_empty() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let history = History::new(store.clone(), 10);
        history.append("u1", &ChatMessage::user("x")).await.unwrap();
        store.poison().await;
        assert!(history.load("u1").await.is_empty());
    }
}

//! In-process conversation store for single-worker deployments.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use super::{Conversation, ConversationStore};

#[derive(Default)]
pub struct MemoryStore {
    chats: DashMap<i64, Conversation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, chat_id: i64) -> Result<Option<Conversation>> {
        Ok(self.chats.get(&chat_id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, chat_id: i64, convo: &Conversation) -> Result<()> {
        self.chats.insert(chat_id, convo.clone());
        Ok(())
    }

    async fn clear(&self, chat_id: i64) -> Result<()> {
        self.chats.remove(&chat_id);
        Ok(())
    }
}

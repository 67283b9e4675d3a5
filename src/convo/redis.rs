//! Redis-backed conversation store for multi-worker deployments.
//!
//! State is serialized as JSON under `convo:<chat_id>` with a TTL, so an
//! abandoned flow ages out on its own.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;

use super::{Conversation, ConversationStore};

/// Abandoned conversations expire after a day.
const CONVO_TTL_SECS: u64 = 24 * 60 * 60;

pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid REDIS_URL")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("redis connection failed")?;
        Ok(Self { conn })
    }
}

fn key(chat_id: i64) -> String {
    format!("convo:{chat_id}")
}

#[async_trait]
impl ConversationStore for RedisStore {
    async fn load(&self, chat_id: i64) -> Result<Option<Conversation>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key(chat_id)).await?;
        match raw {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("corrupt conversation state")?,
            )),
            None => Ok(None),
        }
    }

    async fn save(&self, chat_id: i64, convo: &Conversation) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(convo)?;
        let _: () = conn.set_ex(key(chat_id), json, CONVO_TTL_SECS).await?;
        Ok(())
    }

    async fn clear(&self, chat_id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key(chat_id)).await?;
        Ok(())
    }
}

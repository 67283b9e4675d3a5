//! User records: one row per registered chat identity.

use tokio_postgres::Row;

use super::Store;
use crate::domain::User;
use crate::error::StoreError;

impl Store {
    /// Registration completion. Idempotent over chat_id: re-running
    /// updates phone and names, never creates a duplicate.
    pub async fn upsert_user(
        &self,
        chat_id: i64,
        phone: &str,
        first_name: &str,
        last_name: &str,
    ) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .execute(
                "INSERT INTO users (chat_id, phone, first_name, last_name)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (chat_id) DO UPDATE
                 SET phone = EXCLUDED.phone,
                     first_name = EXCLUDED.first_name,
                     last_name = EXCLUDED.last_name,
                     updated_at = now()",
                &[&chat_id, &phone, &first_name, &last_name],
            )
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, chat_id: i64) -> Result<Option<User>, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT chat_id, phone, first_name, last_name, created_at, updated_at
                 FROM users WHERE chat_id = $1",
                &[&chat_id],
            )
            .await?;
        Ok(row.map(user_from_row))
    }
}

fn user_from_row(row: Row) -> User {
    User {
        chat_id: row.get("chat_id"),
        phone: row.get("phone"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

use sqlx::SqlitePool;

use crate::UserId;

/// Registered push tokens per user.
#[derive(Clone)]
pub struct DeviceTokens {
    db_pool: SqlitePool,
}

impl DeviceTokens {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn register(&self, user_id: UserId, token: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO device_tokens (user_id,token) VALUES (?,?)")
            .bind(user_id)
            .bind(token)
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    pub async fn unregister(&self, user_id: UserId, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM device_tokens WHERE user_id=? AND token=?")
            .bind(user_id)
            .bind(token)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(&self, user_id: UserId) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT token FROM device_tokens WHERE user_id=? ORDER BY token")
            .bind(user_id)
            .fetch_all(&self.db_pool)
            .await
    }
}

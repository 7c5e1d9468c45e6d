use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::{error::ChatResult, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Read side of the profile service, used to label notifications.
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn get(&self, user_id: UserId) -> ChatResult<Option<Profile>>;
}

#[derive(Clone)]
pub struct SqliteProfiles {
    db_pool: SqlitePool,
}

impl SqliteProfiles {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn upsert(&self, profile: &Profile) -> ChatResult<()> {
        sqlx::query(
            "INSERT INTO profiles (user_id,display_name,avatar_url) VALUES (?,?,?)
             ON CONFLICT (user_id) DO UPDATE SET
                display_name=excluded.display_name,
                avatar_url=excluded.avatar_url",
        )
        .bind(profile.user_id)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for SqliteProfiles {
    async fn get(&self, user_id: UserId) -> ChatResult<Option<Profile>> {
        let profile: Option<Profile> =
            sqlx::query_as("SELECT user_id,display_name,avatar_url FROM profiles WHERE user_id=?")
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(profile)
    }
}

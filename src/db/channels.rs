//! Registered-channel repository (ChanServ backing store).

use super::DbError;
use chrono::Utc;
use sqlx::SqlitePool;

/// A persisted channel registration.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RegisteredChannel {
    pub id: i64,
    pub name: String,
    pub founder: String,
    pub topic: Option<String>,
    pub modes: Option<String>,
    pub registered_at: i64,
}

/// One access-list entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelAccess {
    pub account: String,
    pub level: String,
}

/// Repository over channel registrations.
pub struct ChannelRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChannelRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn register(&self, name: &str, founder: &str) -> Result<RegisteredChannel, DbError> {
        if self.find(name).await?.is_some() {
            return Err(DbError::ChannelExists(name.to_string()));
        }
        sqlx::query("INSERT INTO channels (name, founder, registered_at) VALUES (?, ?, ?)")
            .bind(name)
            .bind(founder)
            .bind(Utc::now().timestamp())
            .execute(self.pool)
            .await?;
        self.find(name)
            .await?
            .ok_or_else(|| DbError::ChannelNotFound(name.to_string()))
    }

    pub async fn find(&self, name: &str) -> Result<Option<RegisteredChannel>, DbError> {
        let row = sqlx::query_as::<_, RegisteredChannel>("SELECT * FROM channels WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    pub async fn all(&self) -> Result<Vec<RegisteredChannel>, DbError> {
        let rows = sqlx::query_as::<_, RegisteredChannel>("SELECT * FROM channels ORDER BY name")
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn drop_channel(&self, name: &str) -> Result<(), DbError> {
        let channel = self
            .find(name)
            .await?
            .ok_or_else(|| DbError::ChannelNotFound(name.to_string()))?;
        sqlx::query("DELETE FROM channel_access WHERE channel_id = ?")
            .bind(channel.id)
            .execute(self.pool)
            .await?;
        sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(channel.id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Persist the topic so a registered channel survives emptiness.
    pub async fn save_topic(&self, name: &str, topic: Option<&str>) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET topic = ? WHERE name = ?")
            .bind(topic)
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Persist the simple-mode string.
    pub async fn save_modes(&self, name: &str, modes: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE channels SET modes = ? WHERE name = ?")
            .bind(modes)
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_access(&self, name: &str, account: &str, level: &str) -> Result<(), DbError> {
        let channel = self
            .find(name)
            .await?
            .ok_or_else(|| DbError::ChannelNotFound(name.to_string()))?;
        sqlx::query(
            "INSERT OR REPLACE INTO channel_access (channel_id, account, level) VALUES (?, ?, ?)",
        )
        .bind(channel.id)
        .bind(account)
        .bind(level)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_access(&self, name: &str, account: &str) -> Result<(), DbError> {
        let channel = self
            .find(name)
            .await?
            .ok_or_else(|| DbError::ChannelNotFound(name.to_string()))?;
        sqlx::query("DELETE FROM channel_access WHERE channel_id = ? AND account = ?")
            .bind(channel.id)
            .bind(account)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn access_list(&self, name: &str) -> Result<Vec<ChannelAccess>, DbError> {
        let channel = self
            .find(name)
            .await?
            .ok_or_else(|| DbError::ChannelNotFound(name.to_string()))?;
        let rows = sqlx::query_as::<_, ChannelAccess>(
            "SELECT account, level FROM channel_access WHERE channel_id = ? ORDER BY account",
        )
        .bind(channel.id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Access level for one account on a channel, founder included.
    pub async fn access_for(&self, name: &str, account: &str) -> Result<Option<String>, DbError> {
        let Some(channel) = self.find(name).await? else {
            return Ok(None);
        };
        if channel.founder.eq_ignore_ascii_case(account) {
            return Ok(Some("founder".to_string()));
        }
        let level = sqlx::query_scalar::<_, String>(
            "SELECT level FROM channel_access WHERE channel_id = ? AND account = ?",
        )
        .bind(channel.id)
        .bind(account)
        .fetch_optional(self.pool)
        .await?;
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{Database, DbError};

    #[tokio::test]
    async fn register_find_drop() {
        let db = Database::open_in_memory().await.unwrap();
        db.channels().register("#rust", "alice").await.unwrap();
        assert!(matches!(
            db.channels().register("#RUST", "bob").await,
            Err(DbError::ChannelExists(_))
        ));
        let found = db.channels().find("#rust").await.unwrap().unwrap();
        assert_eq!(found.founder, "alice");

        db.channels().drop_channel("#rust").await.unwrap();
        assert!(db.channels().find("#rust").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn topic_and_modes_persist() {
        let db = Database::open_in_memory().await.unwrap();
        db.channels().register("#rust", "alice").await.unwrap();
        db.channels().save_topic("#rust", Some("hello")).await.unwrap();
        db.channels().save_modes("#rust", "+nt").await.unwrap();
        let found = db.channels().find("#rust").await.unwrap().unwrap();
        assert_eq!(found.topic.as_deref(), Some("hello"));
        assert_eq!(found.modes.as_deref(), Some("+nt"));
    }

    #[tokio::test]
    async fn access_levels() {
        let db = Database::open_in_memory().await.unwrap();
        db.channels().register("#rust", "alice").await.unwrap();
        db.channels().set_access("#rust", "bob", "op").await.unwrap();

        assert_eq!(
            db.channels().access_for("#rust", "alice").await.unwrap().as_deref(),
            Some("founder")
        );
        assert_eq!(
            db.channels().access_for("#rust", "bob").await.unwrap().as_deref(),
            Some("op")
        );
        assert_eq!(db.channels().access_for("#rust", "eve").await.unwrap(), None);

        db.channels().remove_access("#rust", "bob").await.unwrap();
        assert_eq!(db.channels().access_for("#rust", "bob").await.unwrap(), None);
    }
}

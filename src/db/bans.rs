//! Network-ban repository.

use super::DbError;
use crate::security::{BanKind, ServerBan};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
struct BanRow {
    id: i64,
    kind: String,
    pattern: String,
    reason: String,
    set_by: String,
    set_at: i64,
    expires_at: Option<i64>,
}

impl BanRow {
    fn into_ban(self) -> Option<ServerBan> {
        Some(ServerBan {
            id: self.id,
            kind: BanKind::parse(&self.kind)?,
            pattern: self.pattern,
            reason: self.reason,
            set_by: self.set_by,
            set_at: ts(self.set_at),
            expires_at: self.expires_at.map(ts),
        })
    }
}

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

/// Repository over the bans table.
pub struct BanRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(
        &self,
        kind: BanKind,
        pattern: &str,
        reason: &str,
        set_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<i64, DbError> {
        let id = sqlx::query(
            "INSERT INTO bans (kind, pattern, reason, set_by, set_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(kind.as_str())
        .bind(pattern)
        .bind(reason)
        .bind(set_by)
        .bind(Utc::now().timestamp())
        .bind(expires_at.map(|t| t.timestamp()))
        .execute(self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Remove by kind + pattern; returns how many went away.
    pub async fn remove(&self, kind: BanKind, pattern: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM bans WHERE kind = ? AND pattern = ?")
            .bind(kind.as_str())
            .bind(pattern)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// All unexpired bans.
    pub async fn all_active(&self) -> Result<Vec<ServerBan>, DbError> {
        let rows = sqlx::query_as::<_, BanRow>(
            "SELECT * FROM bans WHERE expires_at IS NULL OR expires_at > ?",
        )
        .bind(Utc::now().timestamp())
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(BanRow::into_ban).collect())
    }

    /// Unexpired bans of one kind.
    pub async fn active_of_kind(&self, kind: BanKind) -> Result<Vec<ServerBan>, DbError> {
        let rows = sqlx::query_as::<_, BanRow>(
            "SELECT * FROM bans WHERE kind = ? AND (expires_at IS NULL OR expires_at > ?)",
        )
        .bind(kind.as_str())
        .bind(Utc::now().timestamp())
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().filter_map(BanRow::into_ban).collect())
    }

    /// Delete expired rows; returns how many.
    pub async fn prune_expired(&self) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM bans WHERE expires_at IS NOT NULL AND expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    #[tokio::test]
    async fn add_list_remove() {
        let db = Database::open_in_memory().await.unwrap();
        db.bans()
            .add(BanKind::KLine, "*@bad.example", "spam", "oper", None)
            .await
            .unwrap();
        db.bans()
            .add(BanKind::ZLine, "198.51.100.0/24", "abuse", "oper", None)
            .await
            .unwrap();

        let all = db.bans().all_active().await.unwrap();
        assert_eq!(all.len(), 2);

        let klines = db.bans().active_of_kind(BanKind::KLine).await.unwrap();
        assert_eq!(klines.len(), 1);
        assert_eq!(klines[0].pattern, "*@bad.example");

        let removed = db.bans().remove(BanKind::KLine, "*@bad.example").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.bans().all_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn expired_bans_filtered_and_pruned() {
        let db = Database::open_in_memory().await.unwrap();
        db.bans()
            .add(
                BanKind::GLine,
                "*@old.example",
                "expired",
                "oper",
                Some(Utc::now() - Duration::minutes(5)),
            )
            .await
            .unwrap();

        assert!(db.bans().all_active().await.unwrap().is_empty());
        assert_eq!(db.bans().prune_expired().await.unwrap(), 1);
    }
}

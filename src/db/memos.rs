//! Memo repository (MemoServ backing store).

use super::DbError;
use chrono::Utc;
use sqlx::SqlitePool;

/// A stored memo.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Memo {
    pub id: i64,
    pub to_account: String,
    pub from_account: String,
    pub text: String,
    pub sent_at: i64,
    pub is_read: bool,
}

/// Repository over memos.
pub struct MemoRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> MemoRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn send(&self, to_account: &str, from_account: &str, text: &str) -> Result<i64, DbError> {
        let id = sqlx::query(
            "INSERT INTO memos (to_account, from_account, text, sent_at) VALUES (?, ?, ?, ?)",
        )
        .bind(to_account)
        .bind(from_account)
        .bind(text)
        .bind(Utc::now().timestamp())
        .execute(self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    pub async fn list_for(&self, account: &str) -> Result<Vec<Memo>, DbError> {
        let rows = sqlx::query_as::<_, Memo>(
            "SELECT * FROM memos WHERE to_account = ? ORDER BY sent_at",
        )
        .bind(account)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn unread_count(&self, account: &str) -> Result<i64, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM memos WHERE to_account = ? AND is_read = 0",
        )
        .bind(account)
        .fetch_one(self.pool)
        .await?;
        Ok(count)
    }

    /// Fetch one memo for an account, marking it read.
    pub async fn read(&self, account: &str, memo_id: i64) -> Result<Option<Memo>, DbError> {
        let memo = sqlx::query_as::<_, Memo>(
            "SELECT * FROM memos WHERE to_account = ? AND id = ?",
        )
        .bind(account)
        .bind(memo_id)
        .fetch_optional(self.pool)
        .await?;
        if memo.is_some() {
            sqlx::query("UPDATE memos SET is_read = 1 WHERE id = ?")
                .bind(memo_id)
                .execute(self.pool)
                .await?;
        }
        Ok(memo)
    }

    pub async fn delete(&self, account: &str, memo_id: i64) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM memos WHERE to_account = ? AND id = ?")
            .bind(account)
            .bind(memo_id)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[tokio::test]
    async fn memo_lifecycle() {
        let db = Database::open_in_memory().await.unwrap();
        let id = db.memos().send("alice", "bob", "hi alice").await.unwrap();

        assert_eq!(db.memos().unread_count("alice").await.unwrap(), 1);

        let listed = db.memos().list_for("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].is_read);

        let read = db.memos().read("alice", id).await.unwrap().unwrap();
        assert_eq!(read.text, "hi alice");
        assert_eq!(db.memos().unread_count("alice").await.unwrap(), 0);

        assert_eq!(db.memos().delete("alice", id).await.unwrap(), 1);
        assert!(db.memos().list_for("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_is_scoped_to_recipient() {
        let db = Database::open_in_memory().await.unwrap();
        let id = db.memos().send("alice", "bob", "secret").await.unwrap();
        assert!(db.memos().read("eve", id).await.unwrap().is_none());
        assert_eq!(db.memos().delete("eve", id).await.unwrap(), 0);
    }
}

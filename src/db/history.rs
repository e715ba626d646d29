//! Stored-message repository backing `draft/chathistory`.
//!
//! Append-only; retention is age-based pruning. All selectors return
//! ascending-timestamp order, ready for batch emission.

use super::DbError;
use sqlx::SqlitePool;

/// One stored message.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredMessage {
    pub msg_id: String,
    pub target: String,
    pub sender_uid: String,
    pub sender_account: Option<String>,
    pub text: String,
    pub tags: Option<String>,
    pub ts: i64,
}

/// A selector anchor: a timestamp or a message ID.
#[derive(Debug, Clone)]
pub enum Anchor {
    Ts(i64),
    MsgId(String),
}

/// Repository over stored messages.
pub struct HistoryRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> HistoryRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append one message.
    pub async fn append(&self, msg: &StoredMessage) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR IGNORE INTO messages
             (msg_id, target, sender_uid, sender_account, text, tags, ts)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&msg.msg_id)
        .bind(&msg.target)
        .bind(&msg.sender_uid)
        .bind(&msg.sender_account)
        .bind(&msg.text)
        .bind(&msg.tags)
        .bind(msg.ts)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Resolve an anchor to a timestamp. A missing msgid resolves to
    /// `None` (the caller emits an empty batch, never an error).
    pub async fn resolve_anchor(&self, target: &str, anchor: &Anchor) -> Result<Option<i64>, DbError> {
        match anchor {
            Anchor::Ts(ts) => Ok(Some(*ts)),
            Anchor::MsgId(id) => {
                let ts = sqlx::query_scalar::<_, i64>(
                    "SELECT ts FROM messages WHERE target = ? AND msg_id = ?",
                )
                .bind(target)
                .bind(id)
                .fetch_optional(self.pool)
                .await?;
                Ok(ts)
            }
        }
    }

    /// Most recent `limit` messages, ascending.
    pub async fn latest(&self, target: &str, limit: u32) -> Result<Vec<StoredMessage>, DbError> {
        let mut rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE target = ? ORDER BY ts DESC, rowid DESC LIMIT ?",
        )
        .bind(target)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Messages strictly before the anchor, ascending.
    pub async fn before(
        &self,
        target: &str,
        anchor: &Anchor,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let Some(ts) = self.resolve_anchor(target, anchor).await? else {
            return Ok(Vec::new());
        };
        let mut rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE target = ? AND ts < ?
             ORDER BY ts DESC, rowid DESC LIMIT ?",
        )
        .bind(target)
        .bind(ts)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        rows.reverse();
        Ok(rows)
    }

    /// Messages strictly after the anchor, ascending.
    pub async fn after(
        &self,
        target: &str,
        anchor: &Anchor,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let Some(ts) = self.resolve_anchor(target, anchor).await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE target = ? AND ts > ?
             ORDER BY ts, rowid LIMIT ?",
        )
        .bind(target)
        .bind(ts)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// ⌊limit/2⌋ messages ending at the anchor plus the remainder after
    /// it, ascending.
    pub async fn around(
        &self,
        target: &str,
        anchor: &Anchor,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let Some(ts) = self.resolve_anchor(target, anchor).await? else {
            return Ok(Vec::new());
        };
        let half = limit / 2;
        let mut before_or_at = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE target = ? AND ts <= ?
             ORDER BY ts DESC, rowid DESC LIMIT ?",
        )
        .bind(target)
        .bind(ts)
        .bind(half)
        .fetch_all(self.pool)
        .await?;
        before_or_at.reverse();

        let remainder = limit.saturating_sub(before_or_at.len() as u32);
        let after = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE target = ? AND ts > ?
             ORDER BY ts, rowid LIMIT ?",
        )
        .bind(target)
        .bind(ts)
        .bind(remainder)
        .fetch_all(self.pool)
        .await?;

        before_or_at.extend(after);
        Ok(before_or_at)
    }

    /// Messages strictly between two anchors, ascending.
    pub async fn between(
        &self,
        target: &str,
        from: &Anchor,
        to: &Anchor,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, DbError> {
        let (Some(a), Some(b)) = (
            self.resolve_anchor(target, from).await?,
            self.resolve_anchor(target, to).await?,
        ) else {
            return Ok(Vec::new());
        };
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let rows = sqlx::query_as::<_, StoredMessage>(
            "SELECT * FROM messages WHERE target = ? AND ts > ? AND ts < ?
             ORDER BY ts, rowid LIMIT ?",
        )
        .bind(target)
        .bind(lo)
        .bind(hi)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Distinct targets with activity in a window, with their latest
    /// timestamp, ascending by that timestamp.
    pub async fn targets(
        &self,
        from_ts: i64,
        to_ts: i64,
        limit: u32,
    ) -> Result<Vec<(String, i64)>, DbError> {
        let (lo, hi) = if from_ts <= to_ts { (from_ts, to_ts) } else { (to_ts, from_ts) };
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT target, MAX(ts) AS latest FROM messages
             WHERE ts > ? AND ts < ? GROUP BY target ORDER BY latest LIMIT ?",
        )
        .bind(lo)
        .bind(hi)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Age-based retention: delete messages older than `cutoff_ts`.
    pub async fn prune_older_than(&self, cutoff_ts: i64) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM messages WHERE ts < ?")
            .bind(cutoff_ts)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn seeded() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        for (i, ts) in [100, 110, 120, 130, 140, 150].iter().enumerate() {
            db.history()
                .append(&StoredMessage {
                    msg_id: format!("m{}", i + 1),
                    target: "#h".into(),
                    sender_uid: "001AAAABA".into(),
                    sender_account: None,
                    text: format!("message {}", i + 1),
                    tags: None,
                    ts: *ts,
                })
                .await
                .unwrap();
        }
        db
    }

    fn ids(msgs: &[StoredMessage]) -> Vec<&str> {
        msgs.iter().map(|m| m.msg_id.as_str()).collect()
    }

    #[tokio::test]
    async fn latest_ascending() {
        let db = seeded().await;
        let msgs = db.history().latest("#h", 3).await.unwrap();
        assert_eq!(ids(&msgs), vec!["m4", "m5", "m6"]);
    }

    #[tokio::test]
    async fn before_and_after() {
        let db = seeded().await;
        let msgs = db
            .history()
            .before("#h", &Anchor::Ts(130), 2)
            .await
            .unwrap();
        assert_eq!(ids(&msgs), vec!["m2", "m3"]);

        let msgs = db
            .history()
            .after("#h", &Anchor::MsgId("m4".into()), 10)
            .await
            .unwrap();
        assert_eq!(ids(&msgs), vec!["m5", "m6"]);
    }

    #[tokio::test]
    async fn around_msgid_anchor() {
        let db = seeded().await;
        let msgs = db
            .history()
            .around("#h", &Anchor::MsgId("m4".into()), 4)
            .await
            .unwrap();
        assert_eq!(ids(&msgs), vec!["m3", "m4", "m5", "m6"]);
    }

    #[tokio::test]
    async fn around_near_start_fills_after() {
        let db = seeded().await;
        let msgs = db
            .history()
            .around("#h", &Anchor::MsgId("m1".into()), 4)
            .await
            .unwrap();
        assert_eq!(ids(&msgs), vec!["m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn between_exclusive() {
        let db = seeded().await;
        let msgs = db
            .history()
            .between("#h", &Anchor::Ts(100), &Anchor::Ts(140), 10)
            .await
            .unwrap();
        assert_eq!(ids(&msgs), vec!["m2", "m3", "m4"]);

        // Reversed anchors behave identically.
        let msgs = db
            .history()
            .between("#h", &Anchor::Ts(140), &Anchor::Ts(100), 10)
            .await
            .unwrap();
        assert_eq!(ids(&msgs), vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn missing_target_or_msgid_yields_empty() {
        let db = seeded().await;
        assert!(db.history().latest("#nowhere", 5).await.unwrap().is_empty());
        assert!(db
            .history()
            .around("#h", &Anchor::MsgId("mX".into()), 4)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn targets_window() {
        let db = seeded().await;
        db.history()
            .append(&StoredMessage {
                msg_id: "p1".into(),
                target: "#other".into(),
                sender_uid: "001AAAABA".into(),
                sender_account: None,
                text: "x".into(),
                tags: None,
                ts: 125,
            })
            .await
            .unwrap();

        let targets = db.history().targets(90, 160, 10).await.unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].0, "#other");
        assert_eq!(targets[1], ("#h".to_string(), 150));
    }

    #[tokio::test]
    async fn prune_by_age() {
        let db = seeded().await;
        let removed = db.history().prune_older_than(130).await.unwrap();
        assert_eq!(removed, 3);
        let msgs = db.history().latest("#h", 10).await.unwrap();
        assert_eq!(ids(&msgs), vec!["m4", "m5", "m6"]);
    }
}

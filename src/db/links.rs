//! Server-link record repository.
//!
//! Link blocks normally come from config; this table lets operators add
//! links at runtime (CONNECT against a stored record) that survive a
//! restart.

use super::DbError;
use sqlx::SqlitePool;

/// A persisted link record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServerLinkRecord {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    pub send_password: String,
    pub receive_password: String,
    pub tls: bool,
    pub autoconnect: bool,
}

/// Repository over server link records.
pub struct LinkRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> LinkRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, record: &ServerLinkRecord) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR REPLACE INTO server_links
             (name, hostname, port, send_password, receive_password, tls, autoconnect)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.name)
        .bind(&record.hostname)
        .bind(record.port)
        .bind(&record.send_password)
        .bind(&record.receive_password)
        .bind(record.tls)
        .bind(record.autoconnect)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, name: &str) -> Result<Option<ServerLinkRecord>, DbError> {
        let row = sqlx::query_as::<_, ServerLinkRecord>("SELECT * FROM server_links WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        Ok(row)
    }

    pub async fn all(&self) -> Result<Vec<ServerLinkRecord>, DbError> {
        let rows = sqlx::query_as::<_, ServerLinkRecord>("SELECT * FROM server_links ORDER BY name")
            .fetch_all(self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn delete(&self, name: &str) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM server_links WHERE name = ?")
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn upsert_find_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let record = ServerLinkRecord {
            name: "hub.example.org".into(),
            hostname: "10.0.0.2".into(),
            port: 7000,
            send_password: "a".into(),
            receive_password: "b".into(),
            tls: true,
            autoconnect: false,
        };
        db.links().upsert(&record).await.unwrap();

        let found = db.links().find("HUB.EXAMPLE.ORG").await.unwrap().unwrap();
        assert_eq!(found.port, 7000);
        assert!(found.tls);

        assert_eq!(db.links().delete("hub.example.org").await.unwrap(), 1);
        assert!(db.links().find("hub.example.org").await.unwrap().is_none());
    }
}

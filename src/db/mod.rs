//! Persistent storage.
//!
//! Async SQLite repositories over a shared pool:
//! - accounts (NickServ), registered nicks, certificate fingerprints
//! - registered channels and access lists (ChanServ)
//! - network bans
//! - server link records
//! - memos (MemoServ)
//! - stored messages (CHATHISTORY)
//!
//! The core enforces uniqueness before persisting; repositories assume
//! at-least-once writes and lookup-consistent reads.

mod accounts;
mod bans;
mod channels;
mod history;
mod links;
mod memos;

pub use accounts::{Account, AccountRepository};
pub use bans::BanRepository;
pub use channels::{ChannelAccess, ChannelRepository, RegisteredChannel};
pub use history::{Anchor, HistoryRepository, StoredMessage};
pub use links::{LinkRepository, ServerLinkRecord};
pub use memos::{Memo, MemoRepository};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("account not found: {0}")]
    AccountNotFound(String),
    #[error("account already exists: {0}")]
    AccountExists(String),
    #[error("nickname already registered: {0}")]
    NicknameRegistered(String),
    #[error("invalid password")]
    InvalidPassword,
    #[error("channel already registered: {0}")]
    ChannelExists(String),
    #[error("channel not registered: {0}")]
    ChannelNotFound(String),
    #[error("insufficient access")]
    InsufficientAccess,
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from
    /// blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (or create) a database, optionally running migrations.
    pub async fn open(path: &str, run_migrations: bool) -> Result<Database, DbError> {
        let pool = if path == ":memory:" {
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);
            Self::pool_options().connect_with(options).await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "failed to create database directory");
                    }
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            Self::pool_options().connect_with(options).await?
        };

        info!(path = %path, "database connected");

        if run_migrations {
            Self::migrate(&pool).await?;
        }

        Ok(Database { pool })
    }

    /// In-memory database with migrations, for tests.
    pub async fn open_in_memory() -> Result<Database, DbError> {
        Database::open(":memory:", true).await
    }

    fn pool_options() -> SqlitePoolOptions {
        SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(Some(Self::IDLE_TIMEOUT))
            .test_before_acquire(true)
    }

    /// Reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn accounts(&self) -> AccountRepository<'_> {
        AccountRepository::new(&self.pool)
    }

    pub fn channels(&self) -> ChannelRepository<'_> {
        ChannelRepository::new(&self.pool)
    }

    pub fn bans(&self) -> BanRepository<'_> {
        BanRepository::new(&self.pool)
    }

    pub fn links(&self) -> LinkRepository<'_> {
        LinkRepository::new(&self.pool)
    }

    pub fn memos(&self) -> MemoRepository<'_> {
        MemoRepository::new(&self.pool)
    }

    pub fn history(&self) -> HistoryRepository<'_> {
        HistoryRepository::new(&self.pool)
    }

    /// Embedded schema, idempotent. `raw_sql` because the schema is a
    /// multi-statement script.
    async fn migrate(pool: &SqlitePool) -> Result<(), DbError> {
        sqlx::raw_sql(SCHEMA).execute(pool).await?;
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash TEXT NOT NULL,
    email         TEXT,
    registered_at INTEGER NOT NULL,
    last_seen     INTEGER NOT NULL,
    is_verified   INTEGER NOT NULL DEFAULT 0,
    is_suspended  INTEGER NOT NULL DEFAULT 0,
    is_operator   INTEGER NOT NULL DEFAULT 0,
    vhost         TEXT
);

CREATE TABLE IF NOT EXISTS account_nicks (
    nick       TEXT PRIMARY KEY COLLATE NOCASE,
    account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS account_certfps (
    fingerprint TEXT PRIMARY KEY,
    account_id  INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS channels (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL UNIQUE COLLATE NOCASE,
    founder       TEXT NOT NULL,
    topic         TEXT,
    modes         TEXT,
    registered_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS channel_access (
    channel_id INTEGER NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
    account    TEXT NOT NULL COLLATE NOCASE,
    level      TEXT NOT NULL,
    PRIMARY KEY (channel_id, account)
);

CREATE TABLE IF NOT EXISTS bans (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    kind       TEXT NOT NULL,
    pattern    TEXT NOT NULL,
    reason     TEXT NOT NULL,
    set_by     TEXT NOT NULL,
    set_at     INTEGER NOT NULL,
    expires_at INTEGER
);

CREATE TABLE IF NOT EXISTS server_links (
    name             TEXT PRIMARY KEY COLLATE NOCASE,
    hostname         TEXT NOT NULL,
    port             INTEGER NOT NULL,
    send_password    TEXT NOT NULL,
    receive_password TEXT NOT NULL,
    tls              INTEGER NOT NULL DEFAULT 0,
    autoconnect      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS memos (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    to_account   TEXT NOT NULL COLLATE NOCASE,
    from_account TEXT NOT NULL,
    text         TEXT NOT NULL,
    sent_at      INTEGER NOT NULL,
    is_read      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    msg_id         TEXT PRIMARY KEY,
    target         TEXT NOT NULL COLLATE NOCASE,
    sender_uid     TEXT NOT NULL,
    sender_account TEXT,
    text           TEXT NOT NULL,
    tags           TEXT,
    ts             INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_target_ts ON messages(target, ts);
CREATE INDEX IF NOT EXISTS idx_memos_to ON memos(to_account);
CREATE INDEX IF NOT EXISTS idx_bans_kind ON bans(kind);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Database::open_in_memory().await.unwrap();
        Database::migrate(db.pool()).await.unwrap();
        Database::migrate(db.pool()).await.unwrap();
    }
}

//! Account repository (NickServ backing store).

use super::DbError;
use crate::security::password;
use chrono::Utc;
use sqlx::SqlitePool;

/// A persisted account row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub password_hash: String,
    pub email: Option<String>,
    pub registered_at: i64,
    pub last_seen: i64,
    pub is_verified: bool,
    pub is_suspended: bool,
    pub is_operator: bool,
    pub vhost: Option<String>,
}

/// Repository over the accounts tables.
pub struct AccountRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AccountRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an account, hashing the password, and register the account
    /// name as its first nick.
    pub async fn create(
        &self,
        name: &str,
        plaintext_password: &str,
        email: Option<&str>,
    ) -> Result<Account, DbError> {
        if self.find_by_name(name).await?.is_some() {
            return Err(DbError::AccountExists(name.to_string()));
        }
        let hash = password::hash_password(plaintext_password)
            .map_err(|_| DbError::InvalidPassword)?;
        let now = Utc::now().timestamp();

        let id = sqlx::query(
            "INSERT INTO accounts (name, password_hash, email, registered_at, last_seen)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(&hash)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?
        .last_insert_rowid();

        sqlx::query("INSERT OR IGNORE INTO account_nicks (nick, account_id) VALUES (?, ?)")
            .bind(name)
            .bind(id)
            .execute(self.pool)
            .await?;

        self.find_by_name(name)
            .await?
            .ok_or_else(|| DbError::AccountNotFound(name.to_string()))
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<Account>, DbError> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool)
            .await?;
        Ok(account)
    }

    /// Password login. Failure never discloses whether the account exists:
    /// a missing account burns a verification against a fixed dummy hash.
    pub async fn identify(&self, name: &str, plaintext: &str) -> Result<Account, DbError> {
        const DUMMY_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$\
            c29tZXNhbHRzb21lc2FsdA$vzGdUBpjnzTlHJhgjVnXzta4qFJkhZeWHW2W/WbyaJc";

        match self.find_by_name(name).await? {
            Some(account) => {
                if account.is_suspended {
                    return Err(DbError::InvalidPassword);
                }
                if password::verify_password(plaintext, &account.password_hash) {
                    self.touch_last_seen(account.id).await?;
                    Ok(account)
                } else {
                    Err(DbError::InvalidPassword)
                }
            }
            None => {
                let _ = password::verify_password(plaintext, DUMMY_HASH);
                Err(DbError::InvalidPassword)
            }
        }
    }

    /// Certificate-fingerprint login (SASL EXTERNAL).
    pub async fn identify_by_certfp(&self, fingerprint: &str) -> Result<Account, DbError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT a.* FROM accounts a
             JOIN account_certfps c ON c.account_id = a.id
             WHERE c.fingerprint = ? AND a.is_suspended = 0",
        )
        .bind(fingerprint)
        .fetch_optional(self.pool)
        .await?
        .ok_or(DbError::InvalidPassword)?;
        self.touch_last_seen(account.id).await?;
        Ok(account)
    }

    pub async fn touch_last_seen(&self, account_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE accounts SET last_seen = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(account_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Attach a nick to an account (GROUP).
    pub async fn register_nick(&self, account_id: i64, nick: &str) -> Result<(), DbError> {
        if self.account_for_nick(nick).await?.is_some() {
            return Err(DbError::NicknameRegistered(nick.to_string()));
        }
        sqlx::query("INSERT INTO account_nicks (nick, account_id) VALUES (?, ?)")
            .bind(nick)
            .bind(account_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// The account owning a nick, if registered.
    pub async fn account_for_nick(&self, nick: &str) -> Result<Option<Account>, DbError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT a.* FROM accounts a
             JOIN account_nicks n ON n.account_id = a.id
             WHERE n.nick = ?",
        )
        .bind(nick)
        .fetch_optional(self.pool)
        .await?;
        Ok(account)
    }

    pub async fn nicks_for(&self, account_id: i64) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT nick FROM account_nicks WHERE account_id = ? ORDER BY nick",
        )
        .bind(account_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn add_certfp(&self, account_id: i64, fingerprint: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR REPLACE INTO account_certfps (fingerprint, account_id) VALUES (?, ?)")
            .bind(fingerprint)
            .bind(account_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn certfps_for(&self, account_id: i64) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT fingerprint FROM account_certfps WHERE account_id = ?",
        )
        .bind(account_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_vhost(&self, account_id: i64, vhost: Option<&str>) -> Result<(), DbError> {
        sqlx::query("UPDATE accounts SET vhost = ? WHERE id = ?")
            .bind(vhost)
            .bind(account_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Drop an account and everything hanging off it.
    pub async fn delete(&self, account_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM account_nicks WHERE account_id = ?")
            .bind(account_id)
            .execute(self.pool)
            .await?;
        sqlx::query("DELETE FROM account_certfps WHERE account_id = ?")
            .bind(account_id)
            .execute(self.pool)
            .await?;
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(account_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::db::DbError;

    #[tokio::test]
    async fn create_and_identify() {
        let db = Database::open_in_memory().await.unwrap();
        let created = db.accounts().create("alice", "hunter2", None).await.unwrap();
        assert_eq!(created.name, "alice");

        let identified = db.accounts().identify("alice", "hunter2").await.unwrap();
        assert_eq!(identified.id, created.id);

        assert!(matches!(
            db.accounts().identify("alice", "wrong").await,
            Err(DbError::InvalidPassword)
        ));
        assert!(matches!(
            db.accounts().identify("nobody", "whatever").await,
            Err(DbError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn duplicate_account_rejected() {
        let db = Database::open_in_memory().await.unwrap();
        db.accounts().create("alice", "pw", None).await.unwrap();
        assert!(matches!(
            db.accounts().create("ALICE", "pw", None).await,
            Err(DbError::AccountExists(_))
        ));
    }

    #[tokio::test]
    async fn nick_grouping() {
        let db = Database::open_in_memory().await.unwrap();
        let account = db.accounts().create("alice", "pw", None).await.unwrap();
        db.accounts().register_nick(account.id, "alice_").await.unwrap();

        let owner = db.accounts().account_for_nick("ALICE_").await.unwrap().unwrap();
        assert_eq!(owner.id, account.id);

        let nicks = db.accounts().nicks_for(account.id).await.unwrap();
        assert_eq!(nicks, vec!["alice", "alice_"]);

        let bob = db.accounts().create("bob", "pw", None).await.unwrap();
        assert!(matches!(
            db.accounts().register_nick(bob.id, "alice_").await,
            Err(DbError::NicknameRegistered(_))
        ));
    }

    #[tokio::test]
    async fn certfp_identify() {
        let db = Database::open_in_memory().await.unwrap();
        let account = db.accounts().create("alice", "pw", None).await.unwrap();
        db.accounts().add_certfp(account.id, "aabbcc").await.unwrap();

        let found = db.accounts().identify_by_certfp("aabbcc").await.unwrap();
        assert_eq!(found.id, account.id);
        assert!(db.accounts().identify_by_certfp("ffffff").await.is_err());
    }

    #[tokio::test]
    async fn delete_cascades() {
        let db = Database::open_in_memory().await.unwrap();
        let account = db.accounts().create("alice", "pw", None).await.unwrap();
        db.accounts().delete(account.id).await.unwrap();
        assert!(db.accounts().find_by_name("alice").await.unwrap().is_none());
        assert!(db.accounts().account_for_nick("alice").await.unwrap().is_none());
    }
}

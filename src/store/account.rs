//! Account repository

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// An account
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// Account repository
#[derive(Clone)]
pub struct AccountRepo {
    pool: DbPool,
}

impl AccountRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create an account with a password
    ///
    /// # Errors
    ///
    /// Returns error if the username is taken or the insert fails
    pub fn create(&self, username: &str, password: &str) -> Result<Account> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let digest = password_digest(password);

        conn.execute(
            "INSERT INTO accounts (id, username, password_digest, created_at) VALUES (?1, ?2, ?3, ?4)",
            [&id, username, &digest, &now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Account {
            id,
            username: username.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Verify a username/password pair
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if the account does not exist or the
    /// password does not match
    pub fn verify(&self, username: &str, password: &str) -> Result<Account> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let row: Option<(Account, Option<String>)> = conn
            .query_row(
                "SELECT id, username, password_digest, created_at FROM accounts WHERE username = ?1",
                [username],
                |row| {
                    Ok((
                        Account {
                            id: row.get(0)?,
                            username: row.get(1)?,
                            created_at: parse_datetime(&row.get::<_, String>(3)?),
                        },
                        row.get(2)?,
                    ))
                },
            )
            .ok();

        let Some((account, stored)) = row else {
            return Err(Error::Auth("unknown username or wrong password".to_string()));
        };

        match stored {
            Some(digest) if digest == password_digest(password) => Ok(account),
            _ => Err(Error::Auth("unknown username or wrong password".to_string())),
        }
    }

    /// Find an account by username
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let account = conn
            .query_row(
                "SELECT id, username, created_at FROM accounts WHERE username = ?1",
                [username],
                |row| {
                    Ok(Account {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        created_at: parse_datetime(&row.get::<_, String>(2)?),
                    })
                },
            )
            .ok();

        Ok(account)
    }

    /// Find or create a passwordless local account
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_or_create(&self, username: &str) -> Result<Account> {
        if let Some(account) = self.find_by_username(username)? {
            return Ok(account);
        }

        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO accounts (id, username, created_at) VALUES (?1, ?2, ?3)",
            [&id, username, &now],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Account {
            id,
            username: username.to_string(),
            created_at: Utc::now(),
        })
    }
}

fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

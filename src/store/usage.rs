//! Per-day request counter

use chrono::Utc;

use super::DbPool;
use crate::{Error, Result};

/// Repository for the daily request counter
#[derive(Clone)]
pub struct UsageRepo {
    pool: DbPool,
}

impl UsageRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Bump today's request count for the account
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn increment_today(&self, account_id: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let day = Utc::now().format("%Y-%m-%d").to_string();
        conn.execute(
            "INSERT INTO daily_usage (account_id, day, requests) VALUES (?1, ?2, 1)
             ON CONFLICT(account_id, day) DO UPDATE SET requests = requests + 1",
            [account_id, &day],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// Today's request count for the account
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count_today(&self, account_id: &str) -> Result<u32> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let count: Option<i64> = conn
            .query_row(
                "SELECT requests FROM daily_usage WHERE account_id = ?1 AND day = ?2",
                [account_id, &day],
                |row| row.get(0),
            )
            .ok();

        Ok(count.and_then(|c| u32::try_from(c).ok()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountRepo, init_memory};

    #[test]
    fn increments_accumulate_within_a_day() {
        let pool = init_memory().unwrap();
        let account = AccountRepo::new(pool.clone()).find_or_create("local").unwrap();
        let repo = UsageRepo::new(pool);

        assert_eq!(repo.count_today(&account.id).unwrap(), 0);
        repo.increment_today(&account.id).unwrap();
        repo.increment_today(&account.id).unwrap();
        repo.increment_today(&account.id).unwrap();
        assert_eq!(repo.count_today(&account.id).unwrap(), 3);
    }

    #[test]
    fn accounts_are_counted_separately() {
        let pool = init_memory().unwrap();
        let accounts = AccountRepo::new(pool.clone());
        let a = accounts.find_or_create("a").unwrap();
        let b = accounts.find_or_create("b").unwrap();
        let repo = UsageRepo::new(pool);

        repo.increment_today(&a.id).unwrap();
        assert_eq!(repo.count_today(&a.id).unwrap(), 1);
        assert_eq!(repo.count_today(&b.id).unwrap(), 0);
    }
}

//! Transcript log repository

use uuid::Uuid;

use super::DbPool;
use super::account::parse_datetime;
use crate::live::transcript::{LogEntry, Speaker};
use crate::{Error, Result};

/// Repository for finalized transcript entries
#[derive(Clone)]
pub struct LogRepo {
    pool: DbPool,
}

impl LogRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a finalized transcript entry
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn append(&self, account_id: &str, entry: &LogEntry) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO transcript_log (id, account_id, timestamp, speaker, message, response_time_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.id.to_string(),
                account_id,
                entry.timestamp.to_rfc3339(),
                entry.speaker.as_str(),
                entry.message,
                entry.response_time_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX)),
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(())
    }

    /// The most recent `limit` entries, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, account_id: &str, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, speaker, message, response_time_ms
                 FROM transcript_log WHERE account_id = ?1
                 ORDER BY timestamp DESC LIMIT ?2",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut entries: Vec<LogEntry> = stmt
            .query_map(
                rusqlite::params![account_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| {
                    Ok(LogEntry {
                        id: Uuid::parse_str(&row.get::<_, String>(0)?)
                            .unwrap_or_else(|_| Uuid::new_v4()),
                        timestamp: parse_datetime(&row.get::<_, String>(1)?),
                        speaker: speaker_from_str(&row.get::<_, String>(2)?),
                        message: row.get(3)?,
                        is_final: true,
                        response_time_ms: row
                            .get::<_, Option<i64>>(4)?
                            .and_then(|ms| u64::try_from(ms).ok()),
                    })
                },
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        entries.reverse();
        Ok(entries)
    }
}

fn speaker_from_str(s: &str) -> Speaker {
    match s {
        "user" => Speaker::User,
        "assistant" => Speaker::Assistant,
        _ => Speaker::System,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountRepo, init_memory};

    #[test]
    fn append_and_read_back() {
        let pool = init_memory().unwrap();
        let account = AccountRepo::new(pool.clone()).find_or_create("local").unwrap();
        let repo = LogRepo::new(pool);

        let entry = LogEntry::new(Speaker::User, "hello".to_string(), true, None);
        repo.append(&account.id, &entry).unwrap();
        let reply = LogEntry::new(Speaker::Assistant, "hi there".to_string(), true, Some(420));
        repo.append(&account.id, &reply).unwrap();

        let entries = repo.recent(&account.id, 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, Speaker::User);
        assert_eq!(entries[1].message, "hi there");
        assert_eq!(entries[1].response_time_ms, Some(420));
        assert!(entries.iter().all(|e| e.is_final));
    }

    #[test]
    fn recent_respects_the_limit() {
        let pool = init_memory().unwrap();
        let account = AccountRepo::new(pool.clone()).find_or_create("local").unwrap();
        let repo = LogRepo::new(pool);

        for i in 0..5 {
            let entry = LogEntry::new(Speaker::System, format!("entry {i}"), true, None);
            repo.append(&account.id, &entry).unwrap();
        }

        let entries = repo.recent(&account.id, 3).unwrap();
        assert_eq!(entries.len(), 3);
    }
}

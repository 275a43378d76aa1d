//! SQLite answer cache keyed by the exact question text.
//!
//! One row per distinct question. Re-storing a question replaces its answer
//! and timestamp; nothing is evicted except by [`CacheStore::clear`].

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;
const RECENT_LIMIT: usize = 5;

/// A cached question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// Counters for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entry_count: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Most recently stored questions, newest first.
    pub recent_questions: Vec<String>,
    /// Size of the database file; `None` for in-memory stores.
    pub db_size_bytes: Option<u64>,
}

/// Cache persistence error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt timestamp in cache: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// Local question/answer store. Single owner; not shared across threads.
pub struct CacheStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl CacheStore {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.initialize_schema()?;
        info!("Answer cache opened at {}", path.display());
        Ok(store)
    }

    /// In-memory store, gone when dropped.
    pub fn in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS qa_cache (
                question TEXT PRIMARY KEY NOT NULL,
                answer TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_qa_cache_created
                ON qa_cache(created_at);
            "#,
        )?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Exact-match lookup. Case and whitespace are significant.
    pub fn lookup(&self, question: &str) -> Result<Option<CacheEntry>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT question, answer, created_at FROM qa_cache WHERE question = ?1",
                params![question],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((question, answer, created_at)) => {
                debug!("Cache hit: {}", preview(&question));
                Ok(Some(CacheEntry {
                    question,
                    answer,
                    created_at: parse_timestamp(&created_at)?,
                }))
            }
            None => {
                debug!("Cache miss: {}", preview(question));
                Ok(None)
            }
        }
    }

    /// Insert or overwrite the answer for `question`.
    pub fn store(&self, question: &str, answer: &str) -> Result<(), StoreError> {
        // Fixed-width UTC so MIN/MAX over the text column order chronologically.
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.conn.execute(
            r#"
            INSERT INTO qa_cache (question, answer, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(question) DO UPDATE SET
                answer = excluded.answer,
                created_at = excluded.created_at
            "#,
            params![question, answer, now],
        )?;
        info!("Cached answer for: {}", preview(question));
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats, StoreError> {
        let (count, oldest, newest): (i64, Option<String>, Option<String>) = self.conn.query_row(
            "SELECT COUNT(*), MIN(created_at), MAX(created_at) FROM qa_cache",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT question FROM qa_cache ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let recent_questions = stmt
            .query_map(params![RECENT_LIMIT as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let db_size_bytes = match &self.path {
            Some(path) => Some(std::fs::metadata(path)?.len() + wal_size(path)),
            None => None,
        };

        Ok(CacheStats {
            entry_count: count as usize,
            oldest: oldest.as_deref().map(parse_timestamp).transpose()?,
            newest: newest.as_deref().map(parse_timestamp).transpose()?,
            recent_questions,
            db_size_bytes,
        })
    }

    /// Remove every entry. Returns the number removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.conn.execute("DELETE FROM qa_cache", [])?;
        info!("Cleared {} cached answers", removed);
        Ok(removed)
    }
}

fn wal_size(path: &Path) -> u64 {
    let mut wal = path.as_os_str().to_owned();
    wal.push("-wal");
    std::fs::metadata(PathBuf::from(wal))
        .map(|m| m.len())
        .unwrap_or(0)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

/// First 50 characters of a question, for log lines.
pub(crate) fn preview(question: &str) -> String {
    let mut chars = question.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_misses() {
        let store = CacheStore::in_memory().unwrap();
        assert!(store.lookup("What is photosynthesis?").unwrap().is_none());
    }

    #[test]
    fn store_then_lookup() {
        let store = CacheStore::in_memory().unwrap();
        store.store("What is 2+2?", "4").unwrap();

        let entry = store.lookup("What is 2+2?").unwrap().expect("hit");
        assert_eq!(entry.question, "What is 2+2?");
        assert_eq!(entry.answer, "4");
        assert!(entry.created_at <= Utc::now());
    }

    #[test]
    fn overwrite_keeps_last_answer() {
        let store = CacheStore::in_memory().unwrap();
        store.store("q", "a1").unwrap();
        store.store("q", "a2").unwrap();

        assert_eq!(store.lookup("q").unwrap().unwrap().answer, "a2");
        assert_eq!(store.stats().unwrap().entry_count, 1);
    }

    #[test]
    fn keys_are_exact_match() {
        let store = CacheStore::in_memory().unwrap();
        store.store("What is DNA?", "A molecule.").unwrap();

        assert!(store.lookup("what is dna?").unwrap().is_none());
        assert!(store.lookup(" What is DNA?").unwrap().is_none());
        assert!(store.lookup("What is DNA? ").unwrap().is_none());
    }

    #[test]
    fn clear_removes_everything() {
        let store = CacheStore::in_memory().unwrap();
        store.store("a", "1").unwrap();
        store.store("b", "2").unwrap();

        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.lookup("a").unwrap().is_none());
        assert!(store.lookup("b").unwrap().is_none());
        assert_eq!(store.stats().unwrap().entry_count, 0);
        assert_eq!(store.clear().unwrap(), 0);
    }

    #[test]
    fn stats_count_distinct_questions() {
        let store = CacheStore::in_memory().unwrap();
        for q in ["one", "two", "three", "two"] {
            store.store(q, "x").unwrap();
        }

        let stats = store.stats().unwrap();
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.recent_questions.len(), 3);
        assert!(stats.oldest.is_some());
        assert!(stats.oldest <= stats.newest);
        assert_eq!(stats.db_size_bytes, None);
    }

    #[test]
    fn stats_on_empty_store() {
        let store = CacheStore::in_memory().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats, CacheStats::default());
    }

    #[test]
    fn recent_questions_are_capped() {
        let store = CacheStore::in_memory().unwrap();
        for i in 0..8 {
            store.store(&format!("question {}", i), "x").unwrap();
        }
        assert_eq!(store.stats().unwrap().recent_questions.len(), RECENT_LIMIT);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        {
            let store = CacheStore::open(&path).unwrap();
            store.store("persist me", "ok").unwrap();
        }

        let store = CacheStore::open(&path).unwrap();
        assert_eq!(store.lookup("persist me").unwrap().unwrap().answer, "ok");
        let stats = store.stats().unwrap();
        assert!(stats.db_size_bytes.unwrap() > 0);
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn preview_truncates_long_questions() {
        let long = "x".repeat(80);
        assert_eq!(preview(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(preview("short"), "short");
    }
}

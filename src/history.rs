//! history.rs: durable, append-only record of every candidate and every
//! (source, external id) pair seen. Backs dedup and the daily publish counter.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use serde::Serialize;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::clock::local_day_bounds;
use crate::rate_controller::Tier;

/// Hex SHA-256 of the raw text; unique among stored candidates.
pub fn content_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone)]
pub struct NewCandidate<'a> {
    pub source: &'a str,
    pub external_id: Option<&'a str>,
    pub raw_text: &'a str,
    pub final_score: u8,
    pub relevant: bool,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted(i64),
    /// Identical text already stored; carries the existing row id.
    AlreadyExists(i64),
}

impl RecordOutcome {
    pub fn id(&self) -> i64 {
        match *self {
            RecordOutcome::Inserted(id) | RecordOutcome::AlreadyExists(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRow {
    pub id: i64,
    pub source: String,
    pub external_id: Option<String>,
    pub raw_text: String,
    pub content_hash: String,
    pub collected_at: i64,
    pub final_score: u8,
    pub relevant: bool,
    pub published: bool,
    pub published_at: Option<i64>,
    pub tier: Option<String>,
    pub rendered_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedMeta {
    pub id: i64,
    pub source: String,
    pub final_score: u8,
    pub tier: Option<String>,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total: u64,
    pub relevant: u64,
    pub published: u64,
    pub processed_messages: u64,
}

/// SQLite-backed history. One connection behind a mutex; every method is a
/// short statement so holding the lock is cheap.
#[derive(Debug)]
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS candidates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    external_id TEXT,
    raw_text TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    collected_at INTEGER NOT NULL,
    final_score INTEGER NOT NULL CHECK (final_score BETWEEN 0 AND 100),
    relevant INTEGER NOT NULL,
    published INTEGER NOT NULL DEFAULT 0,
    published_at INTEGER,
    tier TEXT,
    rendered_text TEXT
);

CREATE INDEX IF NOT EXISTS idx_candidates_published_at
    ON candidates(published_at) WHERE published = 1;

CREATE TABLE IF NOT EXISTS processed_messages (
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    processed_at INTEGER NOT NULL,
    PRIMARY KEY (source, external_id)
);";

const CANDIDATE_COLUMNS: &str = "id, source, external_id, raw_text, content_hash, collected_at,
     final_score, relevant, published, published_at, tier, rendered_text";

impl HistoryStore {
    /// Open or create the history database, creating parent directories.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Ok(Self::init(conn)?)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> SqlResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite consistent; keep serving.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a candidate keyed by the hash of its raw text.
    /// A second insert of identical text is a no-op returning the first row's id.
    pub fn record_candidate(&self, c: &NewCandidate<'_>) -> SqlResult<RecordOutcome> {
        let hash = content_hash(c.raw_text);
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT INTO candidates (source, external_id, raw_text, content_hash, collected_at, final_score, relevant)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(content_hash) DO NOTHING",
            params![
                c.source,
                c.external_id,
                c.raw_text,
                hash,
                c.collected_at.timestamp(),
                c.final_score.min(100),
                c.relevant,
            ],
        )?;
        if inserted == 1 {
            return Ok(RecordOutcome::Inserted(conn.last_insert_rowid()));
        }
        let id: i64 = conn.query_row(
            "SELECT id FROM candidates WHERE content_hash = ?1",
            params![hash],
            |r| r.get(0),
        )?;
        debug!(target: "history", id, "duplicate content ignored");
        Ok(RecordOutcome::AlreadyExists(id))
    }

    pub fn is_message_processed(&self, source: &str, external_id: &str) -> SqlResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM processed_messages WHERE source = ?1 AND external_id = ?2",
                params![source, external_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns `true` if the pair was newly recorded.
    pub fn mark_message_processed(&self, source: &str, external_id: &str) -> SqlResult<bool> {
        let n = self.conn().execute(
            "INSERT OR IGNORE INTO processed_messages (source, external_id, processed_at)
             VALUES (?1, ?2, ?3)",
            params![source, external_id, Utc::now().timestamp()],
        )?;
        Ok(n == 1)
    }

    /// Flip `published` false→true. Returns `false` if the row was already
    /// published (or does not exist); the earlier publish is left untouched.
    pub fn mark_published(
        &self,
        id: i64,
        rendered_text: &str,
        tier: Tier,
        at: DateTime<Utc>,
    ) -> SqlResult<bool> {
        let n = self.conn().execute(
            "UPDATE candidates
             SET published = 1, published_at = ?2, rendered_text = ?3, tier = ?4
             WHERE id = ?1 AND published = 0",
            params![id, at.timestamp(), rendered_text, tier.as_str()],
        )?;
        Ok(n == 1)
    }

    /// Published items whose publish instant falls on `reference`'s calendar day
    /// in `reference`'s own zone.
    pub fn daily_published_count<Tz: TimeZone>(&self, reference: DateTime<Tz>) -> SqlResult<u32> {
        self.published_count_in(local_day_bounds(&reference))
    }

    /// Published items with `start <= published_at < end` (unix seconds).
    pub fn published_count_in(&self, (start, end): (i64, i64)) -> SqlResult<u32> {
        self.conn().query_row(
            "SELECT COUNT(*) FROM candidates
             WHERE published = 1 AND published_at >= ?1 AND published_at < ?2",
            params![start, end],
            |r| r.get(0),
        )
    }

    pub fn last_published(&self) -> SqlResult<Option<PublishedMeta>> {
        self.conn()
            .query_row(
                "SELECT id, source, final_score, tier, published_at FROM candidates
                 WHERE published = 1
                 ORDER BY published_at DESC, id DESC LIMIT 1",
                [],
                |r| {
                    let ts: i64 = r.get(4)?;
                    Ok(PublishedMeta {
                        id: r.get(0)?,
                        source: r.get(1)?,
                        final_score: r.get(2)?,
                        tier: r.get(3)?,
                        published_at: Utc.timestamp_opt(ts, 0).single().unwrap_or_default(),
                    })
                },
            )
            .optional()
    }

    pub fn get(&self, id: i64) -> SqlResult<Option<CandidateRow>> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id], row_to_candidate)
            .optional()
    }

    /// Newest candidates first.
    pub fn recent(&self, limit: usize) -> SqlResult<Vec<CandidateRow>> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates ORDER BY id DESC LIMIT ?1");
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], row_to_candidate)?;
        rows.collect()
    }

    pub fn stats(&self) -> SqlResult<HistoryStats> {
        let conn = self.conn();
        let (total, relevant, published): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(relevant), 0), COALESCE(SUM(published), 0) FROM candidates",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )?;
        let processed: i64 =
            conn.query_row("SELECT COUNT(*) FROM processed_messages", [], |r| r.get(0))?;
        Ok(HistoryStats {
            total: total.max(0) as u64,
            relevant: relevant.max(0) as u64,
            published: published.max(0) as u64,
            processed_messages: processed.max(0) as u64,
        })
    }
}

fn row_to_candidate(r: &Row<'_>) -> SqlResult<CandidateRow> {
    Ok(CandidateRow {
        id: r.get(0)?,
        source: r.get(1)?,
        external_id: r.get(2)?,
        raw_text: r.get(3)?,
        content_hash: r.get(4)?,
        collected_at: r.get(5)?,
        final_score: r.get(6)?,
        relevant: r.get(7)?,
        published: r.get(8)?,
        published_at: r.get(9)?,
        tier: r.get(10)?,
        rendered_text: r.get(11)?,
    })
}

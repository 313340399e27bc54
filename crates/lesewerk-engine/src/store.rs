// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Persistent recognised-word store backed by SQLite.
//
// One row per (document, page) holding the page's `RecognizedWord` list as
// JSON. Aligned words are never stored: they are regenerated from these
// rows whenever a better transcription arrives.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::{DocumentId, PageNumber, RecognizedWord};

use crate::traits::WordStore;

/// SQLite schema for the page_words table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS page_words (
        document_id TEXT NOT NULL,
        page INTEGER NOT NULL,
        words TEXT NOT NULL,
        word_count INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (document_id, page)
    )
"#;

/// Word store backed by a SQLite database.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively. In an async context, wrap calls in `tokio::task::spawn_blocking`.
pub struct SqliteWordStore {
    conn: Connection,
}

impl SqliteWordStore {
    /// Open (or create) the store at the given path.
    ///
    /// Applies WAL journal mode so readers are not blocked by checkpoint
    /// writes, and creates the table if it does not exist.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| LesewerkError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| LesewerkError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| LesewerkError::Database(format!("create table: {e}")))?;

        info!("word store database opened");
        Ok(Self { conn })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LesewerkError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| LesewerkError::Database(format!("create table: {e}")))?;

        debug!("in-memory word store opened");
        Ok(Self { conn })
    }
}

impl WordStore for SqliteWordStore {
    #[instrument(skip(self), fields(document = %document))]
    fn load(&self, document: DocumentId, page: PageNumber) -> Result<Option<Vec<RecognizedWord>>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT words FROM page_words WHERE document_id = ?1 AND page = ?2",
                params![document.to_string(), page],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| LesewerkError::Database(format!("load page: {e}")))?;

        json.map(|json| serde_json::from_str(&json).map_err(LesewerkError::from))
            .transpose()
    }

    #[instrument(skip(self, words), fields(document = %document, words = words.len()))]
    fn save(&self, document: DocumentId, page: PageNumber, words: &[RecognizedWord]) -> Result<()> {
        let json = serde_json::to_string(words)?;
        let now = Utc::now().to_rfc3339();

        self.conn
            .execute(
                "INSERT INTO page_words (document_id, page, words, word_count, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (document_id, page) DO UPDATE SET
                     words = excluded.words,
                     word_count = excluded.word_count,
                     updated_at = excluded.updated_at",
                params![document.to_string(), page, json, words.len() as i64, now],
            )
            .map_err(|e| LesewerkError::Database(format!("save page: {e}")))?;

        debug!(page, "page words saved");
        Ok(())
    }

    #[instrument(skip(self), fields(document = %document))]
    fn pages(&self, document: DocumentId) -> Result<Vec<PageNumber>> {
        let mut stmt = self
            .conn
            .prepare("SELECT page FROM page_words WHERE document_id = ?1 ORDER BY page ASC")
            .map_err(|e| LesewerkError::Database(format!("prepare pages: {e}")))?;

        let pages = stmt
            .query_map(params![document.to_string()], |row| row.get::<_, PageNumber>(0))
            .map_err(|e| LesewerkError::Database(format!("query pages: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LesewerkError::Database(format!("collect rows: {e}")))?;

        Ok(pages)
    }
}

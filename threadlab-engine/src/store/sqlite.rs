//! SQLite-backed turn and annotation store
//!
//! Schema is created on open with `CREATE TABLE IF NOT EXISTS`, so opening an
//! existing database is idempotent. `thread_annotations.created_at` is the
//! table's AUTOINCREMENT key, which makes it monotonic per database file.

use super::{AnnotationStore, AnnotationWrite, PageRequest, TurnSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use threadlab_common::{AnnotationSource, Error, Result, ThreadAnnotation, Turn};
use tracing::{debug, info};
use uuid::Uuid;

/// Turn source and annotation store over a SQLite pool
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file and ensure the schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&db_url)
            .await?;

        if newly_created {
            info!("Initialized new database: {}", db_path.display());
        } else {
            info!("Opened existing database: {}", db_path.display());
        }

        // WAL lets readers proceed while an import is writing
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database; one connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and ensure the schema
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                container_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                guid TEXT NOT NULL,
                user_id TEXT NOT NULL DEFAULT '',
                text TEXT NOT NULL DEFAULT '',
                reply_to_turn TEXT,
                timestamp TEXT,
                ingest_seq INTEGER NOT NULL,
                PRIMARY KEY (container_id, turn_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_ingest ON turns(container_id, ingest_seq)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS thread_annotations (
                created_at INTEGER PRIMARY KEY AUTOINCREMENT,
                container_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                thread_id TEXT NOT NULL,
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                notes TEXT,
                source TEXT NOT NULL CHECK (source IN ('manual', 'import')),
                created_by TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_annotations_turn \
             ON thread_annotations(container_id, turn_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn turn_from_row(container_id: &str, row: &SqliteRow) -> Result<Turn> {
    let guid: String = row.try_get("guid")?;
    let id = Uuid::parse_str(&guid)
        .map_err(|e| Error::Internal(format!("Invalid turn guid '{}': {}", guid, e)))?;
    let timestamp: Option<DateTime<Utc>> = row.try_get("timestamp")?;
    let ingest_seq: i64 = row.try_get("ingest_seq")?;

    Ok(Turn {
        id,
        turn_id: row.try_get("turn_id")?,
        container_id: container_id.to_string(),
        user_id: row.try_get("user_id")?,
        text: row.try_get("text")?,
        reply_to_turn: row.try_get("reply_to_turn")?,
        timestamp,
        ingest_seq: ingest_seq as u64,
    })
}

fn annotation_from_row(row: &SqliteRow) -> Result<ThreadAnnotation> {
    let source: String = row.try_get("source")?;
    let source = AnnotationSource::parse(&source)
        .ok_or_else(|| Error::Internal(format!("Unknown annotation source '{}'", source)))?;
    let created_at: i64 = row.try_get("created_at")?;

    Ok(ThreadAnnotation {
        turn_id: row.try_get("turn_id")?,
        thread_id: row.try_get("thread_id")?,
        confidence: row.try_get("confidence")?,
        notes: row.try_get("notes")?,
        source,
        created_by: row.try_get("created_by")?,
        created_at: created_at as u64,
    })
}

#[async_trait]
impl TurnSource for SqliteStore {
    async fn fetch_turns(&self, container_id: &str, page: PageRequest) -> Result<Vec<Turn>> {
        let rows = sqlx::query(
            r#"
            SELECT guid, turn_id, user_id, text, reply_to_turn, timestamp, ingest_seq
            FROM turns
            WHERE container_id = ?
            ORDER BY ingest_seq, turn_id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(container_id)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| turn_from_row(container_id, row)).collect()
    }

    async fn store_turns(&self, turns: &[Turn]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for turn in turns {
            sqlx::query(
                r#"
                INSERT INTO turns (
                    container_id, turn_id, guid, user_id, text, reply_to_turn, timestamp, ingest_seq
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(container_id, turn_id) DO UPDATE SET
                    guid = excluded.guid,
                    user_id = excluded.user_id,
                    text = excluded.text,
                    reply_to_turn = excluded.reply_to_turn,
                    timestamp = excluded.timestamp,
                    ingest_seq = excluded.ingest_seq
                "#,
            )
            .bind(&turn.container_id)
            .bind(&turn.turn_id)
            .bind(turn.id.to_string())
            .bind(&turn.user_id)
            .bind(&turn.text)
            .bind(&turn.reply_to_turn)
            .bind(turn.timestamp)
            .bind(turn.ingest_seq as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Stored {} turns", turns.len());
        Ok(())
    }

    async fn next_ingest_seq(&self, container_id: &str) -> Result<u64> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(ingest_seq) FROM turns WHERE container_id = ?")
                .bind(container_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(max.map_or(0, |m| m as u64 + 1))
    }
}

#[async_trait]
impl AnnotationStore for SqliteStore {
    async fn fetch_annotations(
        &self,
        container_id: &str,
        turn_ids: &[String],
    ) -> Result<Vec<ThreadAnnotation>> {
        if turn_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = serde_json::to_string(turn_ids)
            .map_err(|e| Error::Internal(format!("Failed to encode turn ids: {}", e)))?;
        let rows = sqlx::query(
            r#"
            SELECT created_at, turn_id, thread_id, confidence, notes, source, created_by
            FROM thread_annotations
            WHERE container_id = ?
              AND turn_id IN (SELECT value FROM json_each(?))
            ORDER BY created_at
            "#,
        )
        .bind(container_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(annotation_from_row).collect()
    }

    async fn write_annotation(
        &self,
        container_id: &str,
        write: AnnotationWrite,
    ) -> Result<ThreadAnnotation> {
        write.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO thread_annotations (
                container_id, turn_id, thread_id, confidence, notes, source, created_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(container_id)
        .bind(&write.turn_id)
        .bind(&write.thread_id)
        .bind(write.confidence)
        .bind(&write.notes)
        .bind(AnnotationSource::Manual.as_str())
        .bind(&write.created_by)
        .execute(&self.pool)
        .await?;

        Ok(ThreadAnnotation {
            turn_id: write.turn_id,
            thread_id: write.thread_id,
            confidence: write.confidence,
            notes: write.notes,
            source: AnnotationSource::Manual,
            created_by: write.created_by,
            created_at: result.last_insert_rowid() as u64,
        })
    }

    async fn append_imported(
        &self,
        container_id: &str,
        annotations: &[ThreadAnnotation],
    ) -> Result<Vec<ThreadAnnotation>> {
        let mut tx = self.pool.begin().await?;
        let mut stamped = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            let result = sqlx::query(
                r#"
                INSERT INTO thread_annotations (
                    container_id, turn_id, thread_id, confidence, notes, source, created_by
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(container_id)
            .bind(&annotation.turn_id)
            .bind(&annotation.thread_id)
            .bind(annotation.confidence)
            .bind(&annotation.notes)
            .bind(annotation.source.as_str())
            .bind(&annotation.created_by)
            .execute(&mut *tx)
            .await?;

            let mut annotation = annotation.clone();
            annotation.created_at = result.last_insert_rowid() as u64;
            stamped.push(annotation);
        }
        tx.commit().await?;

        debug!("Appended {} imported annotations to {}", stamped.len(), container_id);
        Ok(stamped)
    }
}

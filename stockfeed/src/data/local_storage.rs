//! Local SQLite storage for ingested daily history.
//!
//! Provides persistent storage for:
//! - Merged daily records keyed by `(date, entity_id)`
//! - The entity catalog: watermark and status per stock code
//!
//! Record writes replace the whole row for a key, so repeating a write is
//! always safe. Watermark writes only ever move forward.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use stockfeed_common::config::StorageConfig;

use super::{FieldValue, IngestionRecord};
use crate::catalog::{Entity, EntityStatus};

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- Entity catalog
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    watermark TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    last_error TEXT,
    created_at TEXT DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Merged daily records
CREATE TABLE IF NOT EXISTS daily_records (
    entity_id TEXT NOT NULL,
    date TEXT NOT NULL,
    fields_json TEXT NOT NULL,
    source TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (date, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_daily_records_entity_date
ON daily_records(entity_id, date DESC);
"#;

const DATE_FMT: &str = "%Y-%m-%d";

// ============================================================================
// Store Interface
// ============================================================================

/// Persistence interface used by the catalog, orchestrator, and sweeper.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Add entities that are not yet known. Returns the number added.
    async fn register_entities(&self, ids: &[String]) -> Result<usize>;

    /// All known entities, ordered by id.
    async fn list_entities(&self) -> Result<Vec<Entity>>;

    /// Replace the records for each `(date, entity_id)` key.
    async fn upsert_records(&self, records: &[IngestionRecord], source: &str) -> Result<usize>;

    /// Number of records stored for an entity.
    async fn count_records(&self, entity_id: &str) -> Result<u64>;

    /// Stored watermark for an entity.
    async fn read_watermark(&self, entity_id: &str) -> Result<Option<NaiveDate>>;

    /// Move the watermark forward. Earlier dates leave it untouched.
    async fn write_watermark(&self, entity_id: &str, date: NaiveDate) -> Result<()>;

    /// Record the outcome of the latest attempt for an entity.
    async fn set_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
        last_error: Option<&str>,
    ) -> Result<()>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for local storage
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    /// Path to SQLite database
    pub db_path: PathBuf,
}

impl From<&StorageConfig> for LocalStorageConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            db_path: config.db_path(),
        }
    }
}

// ============================================================================
// Local Storage
// ============================================================================

/// SQLite-backed [`RecordStore`].
pub struct LocalStorage {
    /// rusqlite::Connection is Send but not Sync, hence the Mutex
    db: Arc<Mutex<Connection>>,
    config: LocalStorageConfig,
}

impl LocalStorage {
    /// Open (and create if needed) the database.
    pub fn new(config: LocalStorageConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(&config.db_path)
            .context("Failed to open local storage database")?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("Failed to set database pragmas")?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .context("Failed to create database tables")?;

        info!(db_path = %config.db_path.display(), "Initialized local storage");

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Get the database path
    pub fn db_path(&self) -> &PathBuf {
        &self.config.db_path
    }

    /// Records for an entity in `[start, end]`, in date order.
    pub async fn get_records(
        &self,
        entity_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<IngestionRecord>> {
        let db = self.db.lock().await;
        let start = start.map(|d| d.format(DATE_FMT).to_string());
        let end = end.map(|d| d.format(DATE_FMT).to_string());

        let mut stmt = db.prepare(
            "SELECT entity_id, date, fields_json FROM daily_records
             WHERE entity_id = ?1
               AND (?2 IS NULL OR date >= ?2)
               AND (?3 IS NULL OR date <= ?3)
             ORDER BY date ASC",
        )?;

        let rows = stmt.query_map(params![entity_id, start, end], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (entity_id, date, fields_json) = row?;
            let date = NaiveDate::parse_from_str(&date, DATE_FMT)
                .with_context(|| format!("Corrupt record date {:?}", date))?;
            let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&fields_json)
                .with_context(|| format!("Corrupt record fields for {} {}", entity_id, date))?;
            records.push(IngestionRecord {
                entity_id,
                date,
                fields,
            });
        }
        Ok(records)
    }

    /// Get database statistics
    pub async fn stats(&self) -> Result<LocalStorageStats> {
        let db = self.db.lock().await;

        let entity_count: i64 =
            db.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        let record_count: i64 =
            db.query_row("SELECT COUNT(*) FROM daily_records", [], |row| row.get(0))?;
        let entities_without_records: i64 = db.query_row(
            "SELECT COUNT(*) FROM entities e
             WHERE NOT EXISTS (SELECT 1 FROM daily_records r WHERE r.entity_id = e.id)",
            [],
            |row| row.get(0),
        )?;

        let mut by_status = BTreeMap::new();
        {
            let mut stmt = db.prepare("SELECT status, COUNT(*) FROM entities GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                by_status.insert(status, count as u64);
            }
        }

        let db_size_bytes = std::fs::metadata(&self.config.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(LocalStorageStats {
            entity_count: entity_count as u64,
            record_count: record_count as u64,
            entities_without_records: entities_without_records as u64,
            entities_by_status: by_status,
            db_size_bytes,
        })
    }

    fn row_to_entity(row: &rusqlite::Row) -> rusqlite::Result<Entity> {
        let id: String = row.get(0)?;
        let watermark: Option<String> = row.get(1)?;
        let status: String = row.get(2)?;

        Ok(Entity {
            id,
            watermark: watermark.and_then(|w| NaiveDate::parse_from_str(&w, DATE_FMT).ok()),
            status: EntityStatus::parse(&status),
        })
    }
}

#[async_trait]
impl RecordStore for LocalStorage {
    async fn register_entities(&self, ids: &[String]) -> Result<usize> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let mut added = 0;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO entities (id) VALUES (?1)")?;
            for id in ids {
                added += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(added)
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT id, watermark, status FROM entities ORDER BY id")?;
        let rows = stmt.query_map([], Self::row_to_entity)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn upsert_records(&self, records: &[IngestionRecord], source: &str) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut db = self.db.lock().await;
        let now = Utc::now().to_rfc3339();
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO daily_records
                (entity_id, date, fields_json, source, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for record in records {
                let fields_json = serde_json::to_string(&record.fields)?;
                stmt.execute(params![
                    record.entity_id,
                    record.date.format(DATE_FMT).to_string(),
                    fields_json,
                    source,
                    now,
                ])?;
            }
        }
        tx.commit().context("Failed to commit daily records")?;

        debug!(entity = %records[0].entity_id, count = records.len(), "Saved daily records");
        Ok(records.len())
    }

    async fn count_records(&self, entity_id: &str) -> Result<u64> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM daily_records WHERE entity_id = ?1",
            params![entity_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn read_watermark(&self, entity_id: &str) -> Result<Option<NaiveDate>> {
        let db = self.db.lock().await;
        let watermark: Option<Option<String>> = db
            .query_row(
                "SELECT watermark FROM entities WHERE id = ?1",
                params![entity_id],
                |row| row.get(0),
            )
            .optional()?;

        match watermark.flatten() {
            Some(w) => Ok(Some(
                NaiveDate::parse_from_str(&w, DATE_FMT)
                    .with_context(|| format!("Corrupt watermark {:?} for {}", w, entity_id))?,
            )),
            None => Ok(None),
        }
    }

    async fn write_watermark(&self, entity_id: &str, date: NaiveDate) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO entities (id, watermark, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                watermark = CASE
                    WHEN entities.watermark IS NULL OR entities.watermark < excluded.watermark
                    THEN excluded.watermark
                    ELSE entities.watermark
                END,
                updated_at = excluded.updated_at
            "#,
            params![
                entity_id,
                date.format(DATE_FMT).to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn set_status(
        &self,
        entity_id: &str,
        status: EntityStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO entities (id, status, last_error, updated_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
            params![
                entity_id,
                status.to_string(),
                last_error,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

/// Statistics about local storage
#[derive(Debug, Clone)]
pub struct LocalStorageStats {
    pub entity_count: u64,
    pub record_count: u64,
    pub entities_without_records: u64,
    pub entities_by_status: BTreeMap<String, u64>,
    pub db_size_bytes: u64,
}

impl std::fmt::Display for LocalStorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Storage Status ===")?;
        writeln!(f, "Entities: {}", self.entity_count)?;
        for (status, count) in &self.entities_by_status {
            writeln!(f, "  {}: {}", status, count)?;
        }
        writeln!(f, "Entities without records: {}", self.entities_without_records)?;
        writeln!(f, "Daily records: {}", self.record_count)?;
        write!(
            f,
            "Database size: {:.2} MB",
            self.db_size_bytes as f64 / 1_048_576.0
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

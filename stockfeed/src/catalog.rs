//! Entity catalog.
//!
//! Every stock code the service tracks, with its watermark (the last date
//! whose records are known to be persisted) and the outcome of its latest
//! ingestion attempt. The catalog has no calendar logic: callers pass the
//! due threshold in.

use anyhow::Result;
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::data::RecordStore;

// ============================================================================
// Entity
// ============================================================================

/// Outcome of the latest ingestion attempt for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityStatus {
    /// Not yet processed (or not processed since registration)
    Pending,
    /// Last attempt persisted all records and advanced the watermark
    Updated,
    /// Last attempt gave up
    Failed,
}

impl EntityStatus {
    /// Parse a stored status; unknown values read as `Pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "updated" => Self::Updated,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Updated => "updated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trackable entity (stock code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub watermark: Option<NaiveDate>,
    pub status: EntityStatus,
}

impl Entity {
    /// Whether the entity still needs data up to `threshold`.
    pub fn is_due(&self, threshold: NaiveDate) -> bool {
        self.watermark.map_or(true, |w| w < threshold)
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Catalog view over a [`RecordStore`].
pub struct EntityCatalog {
    store: Arc<dyn RecordStore>,
}

impl EntityCatalog {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Register codes not yet in the catalog. Existing entities keep their
    /// watermark and status.
    pub async fn load(&self, ids: &[String]) -> Result<usize> {
        let added = self.store.register_entities(ids).await?;
        info!(requested = ids.len(), added, "Loaded entity catalog");
        Ok(added)
    }

    /// All entities, ordered by id.
    pub async fn all(&self) -> Result<Vec<Entity>> {
        self.store.list_entities().await
    }

    /// Entities whose watermark is unset or earlier than `threshold`.
    pub async fn list_due(&self, threshold: NaiveDate) -> Result<Vec<Entity>> {
        let due: Vec<Entity> = self
            .store
            .list_entities()
            .await?
            .into_iter()
            .filter(|e| e.is_due(threshold))
            .collect();
        debug!(%threshold, due = due.len(), "Listed due entities");
        Ok(due)
    }

    /// The named entities regardless of watermark. Unknown ids are skipped.
    pub async fn force_include(&self, ids: &[String]) -> Result<Vec<Entity>> {
        let entities = self.store.list_entities().await?;
        Ok(ids
            .iter()
            .filter_map(|id| entities.iter().find(|e| &e.id == id).cloned())
            .collect())
    }

    /// Move the watermark forward. Must only be called once every record
    /// for the range is persisted.
    pub async fn advance_watermark(&self, id: &str, date: NaiveDate) -> Result<()> {
        self.store.write_watermark(id, date).await
    }

    pub async fn watermark(&self, id: &str) -> Result<Option<NaiveDate>> {
        self.store.read_watermark(id).await
    }

    pub async fn mark_updated(&self, id: &str) -> Result<()> {
        self.store.set_status(id, EntityStatus::Updated, None).await
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.store
            .set_status(id, EntityStatus::Failed, Some(error))
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

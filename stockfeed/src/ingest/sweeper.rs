//! Reconciliation sweep.
//!
//! A watermark can claim an entity is current while the store holds nothing
//! for it (an earlier range came back empty, or records were lost). The
//! sweep finds every entity with zero stored records and downloads its full
//! history again, regardless of watermark.

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use super::{EntityOutcome, Orchestrator};

/// Result of a reconciliation sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepResult {
    /// Entities that had no records and now do
    pub recovered: Vec<String>,
    /// Entities that still have no records
    pub still_missing: Vec<String>,
    pub cancelled: bool,
}

/// Re-downloads entities that have no stored records.
pub struct ReconciliationSweeper<'a> {
    orchestrator: &'a Orchestrator,
}

impl<'a> ReconciliationSweeper<'a> {
    pub fn new(orchestrator: &'a Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Entity ids with zero stored records.
    pub async fn find_empty(&self) -> Result<Vec<String>> {
        let store = self.orchestrator.store();
        let mut empty = Vec::new();
        for entity in self.orchestrator.catalog().all().await? {
            if store.count_records(&entity.id).await? == 0 {
                empty.push(entity.id);
            }
        }
        Ok(empty)
    }

    /// Fetch every empty entity from the initial start date through `as_of`.
    pub async fn sweep(&self, as_of: NaiveDate) -> Result<SweepResult> {
        let empty = self.find_empty().await?;
        let mut result = SweepResult::default();

        if empty.is_empty() {
            info!("Reconciliation: every entity has records");
            return Ok(result);
        }

        info!(count = empty.len(), "Reconciliation: re-fetching entities without records");
        let start = self.orchestrator.settings().initial_start_date;
        let entities = self.orchestrator.catalog().force_include(&empty).await?;

        for entity in &entities {
            if self.orchestrator.is_cancelled() {
                result.cancelled = true;
                break;
            }
            if let EntityOutcome::Cancelled =
                self.orchestrator.process_entity(&entity.id, start, as_of).await?
            {
                result.cancelled = true;
                break;
            }
        }

        let store = self.orchestrator.store();
        for id in empty {
            if store.count_records(&id).await? > 0 {
                result.recovered.push(id);
            } else {
                result.still_missing.push(id);
            }
        }

        if !result.still_missing.is_empty() {
            warn!(
                count = result.still_missing.len(),
                entities = %result.still_missing.join(","),
                "Entities still without data"
            );
        }
        Ok(result)
    }
}

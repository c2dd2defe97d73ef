//! Bulk ingestion.
//!
//! The [`Orchestrator`] walks every due entity, fetching the gap between its
//! watermark and the as-of date, and recovers from failures with plain
//! retries or identity rotation. Entities that gave up get one more pass,
//! then the [`ReconciliationSweeper`] re-downloads anything that still has
//! no stored records.

mod orchestrator;
mod report;
mod sweeper;

pub use orchestrator::{EntityOutcome, Orchestrator};
pub use report::IngestReport;
pub use sweeper::{ReconciliationSweeper, SweepResult};

use chrono::NaiveDate;
use std::time::Duration;
use thiserror::Error;

use stockfeed_common::config::IngestConfig;

use crate::data::{SourceError, Variant};

/// Knobs for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Consecutive transient failures before rotation is requested
    pub escalation_threshold: u32,
    /// Fetch attempts per entity per pass before giving up
    pub max_attempts_per_entity: u32,
    /// Fixed delay between plain retries
    pub retry_delay: Duration,
    /// Start date for entities with no watermark, and for reconciliation
    pub initial_start_date: NaiveDate,
    /// Give failed entities one more pass
    pub retry_failed_pass: bool,
    /// Re-download entities with no stored records
    pub reconcile_empty: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            escalation_threshold: config.escalation_threshold,
            max_attempts_per_entity: config.max_attempts_per_entity,
            retry_delay: config.retry_delay(),
            initial_start_date: config.initial_start_date,
            retry_failed_pass: config.retry_failed_pass,
            reconcile_empty: config.reconcile_empty,
        }
    }
}

/// Failure of one fetch-merge-persist attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// A variant fetch failed; the whole attempt counts as failed
    #[error("{variant} fetch failed: {source}")]
    Source {
        variant: Variant,
        #[source]
        source: SourceError,
    },

    #[error("persist failed: {0}")]
    Store(String),
}

impl AttemptError {
    fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{:#}", err))
    }
}

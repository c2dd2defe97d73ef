//! Ingestion orchestrator.
//!
//! Per entity, a small state machine drives fetch attempts:
//!
//! ```text
//!            ┌────────────── Retry ◄──────────────┐
//!            ▼                                    │ transient
//! Pending ─► Fetching ──── failure ── classify ───┤
//!            │  ▲                                 │ rotation required
//!            │  └─────────── Rotate ◄─────────────┘
//!            │ all variants persisted       (rotation unavailable ─► Retry)
//!            ▼
//!         Success                 GiveUp (attempt cap reached, after at least
//!                                         one rotation if rate-limited)
//! ```
//!
//! The watermark only moves in `Success`, after every record of the range
//! is persisted. After a rotation the loop resumes at the same entity.

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::{Entity, EntityCatalog};
use crate::classifier::{ErrorClassifier, ErrorEvent};
use crate::data::{merge_variants, DataSource, RecordStore, Variant};
use crate::identity::{RotationCoordinator, RotationResult};

use super::{AttemptError, IngestReport, IngestSettings, ReconciliationSweeper};

// ============================================================================
// State Machine
// ============================================================================

/// Per-entity ingestion state.
#[derive(Debug)]
enum EntityState {
    Fetching,
    Retry,
    Rotate(ErrorEvent),
    Success(usize),
    GiveUp,
}

impl EntityState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::GiveUp)
    }
}

/// Final outcome for one entity in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityOutcome {
    Updated { records: usize, attempts: u32 },
    GaveUp { error: String, attempts: u32 },
    Cancelled,
}

/// Result of walking a list of entities once.
#[derive(Debug, Default)]
pub(crate) struct PassResult {
    pub updated: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Drives bulk ingestion for the entity catalog.
pub struct Orchestrator {
    source: Arc<dyn DataSource>,
    store: Arc<dyn RecordStore>,
    catalog: EntityCatalog,
    coordinator: Arc<RotationCoordinator>,
    classifier: ErrorClassifier,
    settings: IngestSettings,
    cancel: CancellationToken,
    records_written: AtomicUsize,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn DataSource>,
        store: Arc<dyn RecordStore>,
        coordinator: Arc<RotationCoordinator>,
        settings: IngestSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog: EntityCatalog::new(Arc::clone(&store)),
            classifier: ErrorClassifier::new(settings.escalation_threshold),
            source,
            store,
            coordinator,
            settings,
            cancel,
            records_written: AtomicUsize::new(0),
        }
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run a full batch: main pass, retry pass, then reconciliation.
    ///
    /// `as_of` is both the due threshold and the fetch end date.
    pub async fn run(&self, as_of: NaiveDate) -> Result<IngestReport> {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("ingest_run", run_id = %run_id);
        self.run_batch(run_id, as_of).instrument(span).await
    }

    async fn run_batch(&self, run_id: String, as_of: NaiveDate) -> Result<IngestReport> {
        let rotations_before = self.coordinator.rotation_count();
        let records_before = self.records_written.load(Ordering::SeqCst);
        let mut report = IngestReport::new(run_id, as_of);

        let due = self.catalog.list_due(as_of).await?;
        info!(due = due.len(), %as_of, "Starting ingestion run");

        let main = self.run_pass(&due, as_of, "main").await?;
        report.updated = main.updated;
        report.cancelled = main.cancelled;
        let mut failed = main.failed;

        if !report.cancelled && self.settings.retry_failed_pass && !failed.is_empty() {
            info!(count = failed.len(), "Retrying failed entities");
            let entities = self.catalog.force_include(&failed).await?;
            let retry = self.run_pass(&entities, as_of, "retry").await?;
            report.cancelled = retry.cancelled;
            failed.retain(|id| !retry.updated.contains(id));
            report.retried_ok = retry.updated;
        }
        report.failed = failed;

        if !report.cancelled && self.settings.reconcile_empty {
            let sweep = ReconciliationSweeper::new(self).sweep(as_of).await?;
            report.cancelled = sweep.cancelled;
            report.failed.retain(|id| !sweep.recovered.contains(id));
            report.reconciled = sweep.recovered;
            report.still_missing = sweep.still_missing;
        }

        report.rotations = self.coordinator.rotation_count() - rotations_before;
        report.records_written = self.records_written.load(Ordering::SeqCst) - records_before;

        info!(
            updated = report.updated.len(),
            retried_ok = report.retried_ok.len(),
            failed = report.failed.len(),
            still_missing = report.still_missing.len(),
            rotations = report.rotations,
            records = report.records_written,
            cancelled = report.cancelled,
            "Ingestion run finished"
        );
        Ok(report)
    }

    /// Walk `entities` once in order.
    pub(crate) async fn run_pass(
        &self,
        entities: &[Entity],
        as_of: NaiveDate,
        pass: &str,
    ) -> Result<PassResult> {
        let mut result = PassResult::default();

        for (index, entity) in entities.iter().enumerate() {
            if self.is_cancelled() {
                info!(pass, processed = index, remaining = entities.len() - index, "Pass cancelled");
                result.cancelled = true;
                break;
            }

            let start = entity
                .watermark
                .unwrap_or(self.settings.initial_start_date);

            match self.process_entity(&entity.id, start, as_of).await? {
                EntityOutcome::Updated { .. } => result.updated.push(entity.id.clone()),
                EntityOutcome::GaveUp { .. } => result.failed.push(entity.id.clone()),
                EntityOutcome::Cancelled => {
                    result.cancelled = true;
                    break;
                }
            }
        }

        Ok(result)
    }

    /// Ingest one entity over `[start, end]` and record its status.
    pub async fn process_entity(
        &self,
        entity_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<EntityOutcome> {
        let start = start.min(end);
        let outcome = self
            .ingest_entity(entity_id, start, end)
            .instrument(info_span!("entity", entity = entity_id))
            .await;

        match &outcome {
            EntityOutcome::Updated { records, attempts } => {
                self.catalog.mark_updated(entity_id).await?;
                info!(entity = entity_id, records, attempts, %end, "Entity updated");
            }
            EntityOutcome::GaveUp { error, attempts } => {
                self.catalog.mark_failed(entity_id, error).await?;
                warn!(entity = entity_id, attempts, error = %error, "Giving up on entity");
            }
            EntityOutcome::Cancelled => {}
        }

        Ok(outcome)
    }

    /// Per-entity state machine.
    async fn ingest_entity(&self, entity_id: &str, start: NaiveDate, end: NaiveDate) -> EntityOutcome {
        let mut state = EntityState::Fetching;
        let mut consecutive_failures: u32 = 0;
        let mut attempts: u32 = 0;
        let mut rotation_requested = false;
        let mut last_error = String::new();

        loop {
            if !state.is_terminal() && self.is_cancelled() {
                return EntityOutcome::Cancelled;
            }

            state = match state {
                EntityState::Fetching => {
                    attempts += 1;
                    match self.attempt(entity_id, start, end).await {
                        Ok(records) => EntityState::Success(records),
                        Err(err) => {
                            last_error = err.to_string();
                            let event = self.classifier.classify(&last_error, consecutive_failures);
                            warn!(
                                attempt = attempts,
                                consecutive_failures,
                                classification = %event.classification,
                                requires_rotation = event.requires_rotation,
                                error = %last_error,
                                "Fetch attempt failed"
                            );

                            let capped = attempts >= self.settings.max_attempts_per_entity;
                            // A rate-limited entity gets at least one rotation before giving up
                            if event.requires_rotation && (!capped || !rotation_requested) {
                                EntityState::Rotate(event)
                            } else if capped {
                                EntityState::GiveUp
                            } else {
                                EntityState::Retry
                            }
                        }
                    }
                }

                EntityState::Retry => {
                    consecutive_failures += 1;
                    if !self.pause().await {
                        return EntityOutcome::Cancelled;
                    }
                    EntityState::Fetching
                }

                EntityState::Rotate(event) => {
                    debug!(escalated = event.is_escalated(), "Requesting identity rotation");
                    rotation_requested = true;
                    match self.coordinator.rotate(&self.cancel).await {
                        RotationResult::Rotated { .. } => {
                            consecutive_failures = 0;
                            EntityState::Fetching
                        }
                        RotationResult::Exhausted { .. } | RotationResult::Skipped
                            if attempts >= self.settings.max_attempts_per_entity =>
                        {
                            EntityState::GiveUp
                        }
                        RotationResult::Exhausted { .. } | RotationResult::Skipped => EntityState::Retry,
                        RotationResult::Cancelled => return EntityOutcome::Cancelled,
                    }
                }

                EntityState::Success(records) => {
                    return EntityOutcome::Updated { records, attempts };
                }

                EntityState::GiveUp => {
                    return EntityOutcome::GaveUp {
                        error: last_error,
                        attempts,
                    };
                }
            };
        }
    }

    /// One fetch-merge-persist attempt. Advances the watermark to `end` only
    /// after every record is written.
    async fn attempt(&self, entity_id: &str, start: NaiveDate, end: NaiveDate) -> Result<usize, AttemptError> {
        let mut series = Vec::with_capacity(Variant::ALL.len());
        for variant in Variant::ALL {
            let bars = self
                .source
                .fetch(entity_id, start, end, variant)
                .await
                .map_err(|source| AttemptError::Source { variant, source })?;
            debug!(%variant, rows = bars.len(), "Fetched variant");
            series.push((variant, bars));
        }

        let records = merge_variants(entity_id, &series);
        let written = self
            .store
            .upsert_records(&records, self.source.name())
            .await
            .map_err(AttemptError::store)?;

        self.catalog
            .advance_watermark(entity_id, end)
            .await
            .map_err(AttemptError::store)?;

        self.records_written.fetch_add(written, Ordering::SeqCst);
        Ok(written)
    }

    /// Wait the retry delay. Returns `false` if cancelled meanwhile.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.settings.retry_delay) => true,
        }
    }
}

//! Stockfeed Library
//!
//! Resilient bulk ingestion of A-share daily history. The upstream kline
//! endpoint throttles and blocks aggressively, so the ingestion loop tracks a
//! per-stock watermark, classifies every failure, and rotates the caller's
//! public identity when plain retries will not help.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Ingestion Orchestrator                    │
//! │   catalog ─► fetch variants ─► merge ─► upsert ─► watermark      │
//! │                    │ failure                                     │
//! │                    ▼                                             │
//! │              Error Classifier ──► Rotation Coordinator           │
//! │                                     │            │               │
//! │                              Identity Rotator  Identity Registry │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                      Reconciliation Sweeper                      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod calendar;
pub mod catalog;
pub mod classifier;
pub mod data;
pub mod identity;
pub mod ingest;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use stockfeed_common::config::{Config, RotationConfig};

use crate::catalog::EntityCatalog;
use crate::data::{DataSource, EastmoneySource, LocalStorage, LocalStorageConfig, LocalStorageStats};
use crate::identity::{
    CommandRotator, DisabledRotator, IdentityRegistry, IdentityRotator, RotationCoordinator,
    RotationPolicy,
};
use crate::ingest::{IngestReport, IngestSettings, Orchestrator};

/// Pick the rotation mechanism from configuration.
pub fn build_rotator(config: &RotationConfig) -> Arc<dyn IdentityRotator> {
    match config.command.as_deref().map(str::trim) {
        Some(command) if !command.is_empty() => Arc::new(CommandRotator::new(command, config)),
        _ => Arc::new(DisabledRotator),
    }
}

/// Main ingestion service
pub struct IngestService {
    config: Config,
    storage: Arc<LocalStorage>,
    source: Arc<dyn DataSource>,
    coordinator: Arc<RotationCoordinator>,
}

impl IngestService {
    /// Create the service with the eastmoney source and configured rotator.
    pub fn new(config: Config) -> Result<Self> {
        let storage = LocalStorage::new(LocalStorageConfig::from(&config.storage))
            .context("Failed to open local storage")?;
        let source: Arc<dyn DataSource> = Arc::new(EastmoneySource::new(&config.source));
        let rotator = build_rotator(&config.rotation);
        Ok(Self::with_components(config, Arc::new(storage), source, rotator))
    }

    /// Create the service from explicit components.
    pub fn with_components(
        config: Config,
        storage: Arc<LocalStorage>,
        source: Arc<dyn DataSource>,
        rotator: Arc<dyn IdentityRotator>,
    ) -> Self {
        let registry = Arc::new(IdentityRegistry::new(config.rotation.registry_capacity));
        let coordinator = Arc::new(RotationCoordinator::new(
            rotator,
            registry,
            RotationPolicy::from(&config.rotation),
        ));

        Self {
            config,
            storage,
            source,
            coordinator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<LocalStorage> {
        &self.storage
    }

    pub fn coordinator(&self) -> &Arc<RotationCoordinator> {
        &self.coordinator
    }

    /// Register configured entities and run one ingestion batch up to `as_of`.
    pub async fn run(&self, as_of: NaiveDate, cancel: CancellationToken) -> Result<IngestReport> {
        let orchestrator = Orchestrator::new(
            Arc::clone(&self.source),
            self.storage.clone(),
            Arc::clone(&self.coordinator),
            IngestSettings::from(&self.config.ingest),
            cancel,
        );

        orchestrator.catalog().load(&self.config.entities).await?;
        info!(
            source = self.source.name(),
            entities = self.config.entities.len(),
            "Starting ingestion"
        );
        orchestrator.run(as_of).await
    }

    /// Catalog and store statistics.
    pub async fn status(&self, as_of: NaiveDate) -> Result<StatusReport> {
        let catalog = EntityCatalog::new(self.storage.clone());
        let due = catalog.list_due(as_of).await?.len();
        let stats = self.storage.stats().await?;
        Ok(StatusReport { as_of, due, stats })
    }
}

/// Output of the `status` command.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub as_of: NaiveDate,
    /// Entities whose watermark is before `as_of`
    pub due: usize,
    pub stats: LocalStorageStats,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.stats)?;
        write!(f, "Due as of {}: {}", self.as_of, self.due)
    }
}

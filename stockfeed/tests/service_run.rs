//! Integration tests for the service entry point.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use stockfeed::data::{DailyBar, DataSource, LocalStorage, LocalStorageConfig, SourceError, Variant};
use stockfeed::identity::{DisabledRotator, IdentityRotator};
use stockfeed::{build_rotator, IngestService};
use stockfeed_common::config::{Config, RotationConfig};

/// Serves one bar per call until the configured date.
struct SingleDaySource {
    calls: AtomicU32,
}

#[async_trait]
impl DataSource for SingleDaySource {
    fn name(&self) -> &'static str {
        "single-day"
    }

    async fn fetch(
        &self,
        entity_id: &str,
        _start: NaiveDate,
        end: NaiveDate,
        _variant: Variant,
    ) -> Result<Vec<DailyBar>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if entity_id == "BAD" {
            return Err(SourceError::InvalidSymbol(entity_id.to_string()));
        }
        Ok(vec![DailyBar {
            date: end,
            open: 1.0,
            close: 1.1,
            high: 1.2,
            low: 0.9,
            volume: 100.0,
            amount: 110.0,
            amplitude: None,
            pct_change: None,
            change: None,
            turnover: None,
        }])
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.entities = vec!["600000.SH".into(), "000001.SZ".into(), "BAD".into()];
    config.ingest.retry_delay_ms = 0;
    config.ingest.max_attempts_per_entity = 2;
    config
}

#[tokio::test]
async fn test_service_run_and_status() {
    let dir = tempdir().unwrap();
    let storage = Arc::new(
        LocalStorage::new(LocalStorageConfig {
            db_path: dir.path().join("service.db"),
        })
        .unwrap(),
    );
    let source = Arc::new(SingleDaySource {
        calls: AtomicU32::new(0),
    });
    let service = IngestService::with_components(
        test_config(),
        storage,
        source.clone(),
        Arc::new(DisabledRotator),
    );
    let as_of = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();

    let report = service.run(as_of, CancellationToken::new()).await.unwrap();

    assert_eq!(report.updated, vec!["000001.SZ", "600000.SH"]);
    assert_eq!(report.failed, vec!["BAD"]);
    assert_eq!(report.still_missing, vec!["BAD"]);
    assert_eq!(report.records_written, 2);

    let status = service.status(as_of).await.unwrap();
    assert_eq!(status.due, 1);
    assert_eq!(status.stats.entity_count, 3);
    assert_eq!(status.stats.record_count, 2);
    assert_eq!(status.stats.entities_without_records, 1);
    assert_eq!(status.stats.entities_by_status.get("failed"), Some(&1));
    assert!(status.to_string().contains("Due as of 2024-01-05: 1"));
}

#[test]
fn test_build_rotator_depends_on_command() {
    let disabled = build_rotator(&RotationConfig::default());
    assert!(!disabled.is_enabled());

    let blank = build_rotator(&RotationConfig {
        command: Some("   ".into()),
        ..RotationConfig::default()
    });
    assert!(!blank.is_enabled());

    let command = build_rotator(&RotationConfig {
        command: Some("/usr/local/bin/reconnect-wan".into()),
        ..RotationConfig::default()
    });
    assert!(command.is_enabled());
    assert_eq!(command.name(), "command");
}

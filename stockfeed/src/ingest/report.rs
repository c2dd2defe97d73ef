//! Run report.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// Summary of one ingestion run.
///
/// `still_missing` is advisory: those entities are reported, not treated as
/// a run failure.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub as_of: NaiveDate,
    /// Updated in the main pass
    pub updated: Vec<String>,
    /// Failed the main pass, updated in the retry pass
    pub retried_ok: Vec<String>,
    /// Failed both passes and not recovered by reconciliation; watermark untouched
    pub failed: Vec<String>,
    /// Had no records and received some during reconciliation
    pub reconciled: Vec<String>,
    /// Still without any records after reconciliation
    pub still_missing: Vec<String>,
    /// Successful identity rotations
    pub rotations: u32,
    pub records_written: usize,
    pub cancelled: bool,
}

impl IngestReport {
    pub fn new(run_id: impl Into<String>, as_of: NaiveDate) -> Self {
        Self {
            run_id: run_id.into(),
            as_of,
            ..Self::default()
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, label: &str, ids: &[String]) -> fmt::Result {
    if ids.is_empty() {
        writeln!(f, "{}: 0", label)
    } else {
        writeln!(f, "{}: {} ({})", label, ids.len(), ids.join(", "))
    }
}

impl fmt::Display for IngestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Ingestion Report ===")?;
        writeln!(f, "Run: {}", self.run_id)?;
        writeln!(f, "As of: {}", self.as_of)?;
        writeln!(f, "Updated: {}", self.updated.len())?;
        write_list(f, "Recovered on retry", &self.retried_ok)?;
        write_list(f, "Failed", &self.failed)?;
        write_list(f, "Reconciled", &self.reconciled)?;
        write_list(f, "Still missing", &self.still_missing)?;
        writeln!(f, "Rotations: {}", self.rotations)?;
        write!(f, "Records written: {}", self.records_written)?;
        if self.cancelled {
            write!(f, "\nRun was cancelled before completion")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_lists_missing_entities() {
        let mut report = IngestReport::new("run-1", NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        report.updated = vec!["A".into(), "B".into()];
        report.still_missing = vec!["C".into()];
        report.rotations = 1;

        let text = report.to_string();
        assert!(text.contains("As of: 2024-01-05"));
        assert!(text.contains("Updated: 2"));
        assert!(text.contains("Still missing: 1 (C)"));
        assert!(text.contains("Failed: 0"));
        assert!(!text.contains("cancelled"));
    }

    #[test]
    fn test_display_marks_cancelled() {
        let mut report = IngestReport::new("run-2", NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        report.cancelled = true;
        assert!(report.to_string().contains("cancelled"));
    }
}

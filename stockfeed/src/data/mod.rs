//! Market data types for A-share daily history.
//!
//! A stock's daily bars come in several price-adjustment variants that share
//! one date axis. Each variant is fetched separately and the variants are
//! merged on `date` into one [`IngestionRecord`] per trading day before
//! anything is persisted.
//!
//! # Data Sources
//! - **eastmoney** kline endpoint, `fqt` selects the adjustment variant

mod eastmoney;
pub mod local_storage;
mod provider;

pub use eastmoney::EastmoneySource;
pub use local_storage::{LocalStorage, LocalStorageConfig, LocalStorageStats, RecordStore};
pub use provider::{DataSource, SourceError};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Variants
// ============================================================================

/// Price adjustment variant of a daily series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Unadjusted prices (不复权)
    Raw,
    /// Forward-adjusted prices (前复权)
    ForwardAdjusted,
    /// Backward-adjusted prices (后复权)
    BackwardAdjusted,
}

impl Variant {
    /// All variants, in fetch order.
    pub const ALL: [Variant; 3] = [
        Variant::Raw,
        Variant::ForwardAdjusted,
        Variant::BackwardAdjusted,
    ];

    /// Prefix applied to this variant's field names in a merged record.
    pub fn field_prefix(&self) -> &'static str {
        match self {
            Self::Raw => "",
            Self::ForwardAdjusted => "qfq_",
            Self::BackwardAdjusted => "hfq_",
        }
    }

    /// eastmoney `fqt` parameter (0=不复权, 1=前复权, 2=后复权)
    pub fn fqt(&self) -> u8 {
        match self {
            Self::Raw => 0,
            Self::ForwardAdjusted => 1,
            Self::BackwardAdjusted => 2,
        }
    }

    /// Short tag used in logs and the record's `variants` field.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::ForwardAdjusted => "qfq",
            Self::BackwardAdjusted => "hfq",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// ============================================================================
// Rows
// ============================================================================

/// One daily bar of one variant, as returned by a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// Trading date
    pub date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    /// Volume in lots
    pub volume: f64,
    /// Turnover in CNY
    pub amount: f64,
    /// Intraday amplitude, percent
    #[serde(default)]
    pub amplitude: Option<f64>,
    /// Change versus previous close, percent
    #[serde(default)]
    pub pct_change: Option<f64>,
    /// Change versus previous close, absolute
    #[serde(default)]
    pub change: Option<f64>,
    /// Turnover rate, percent
    #[serde(default)]
    pub turnover: Option<f64>,
}

impl DailyBar {
    /// Named numeric fields of this bar, unprefixed.
    fn named_fields(&self) -> Vec<(&'static str, f64)> {
        let mut fields = vec![
            ("open", self.open),
            ("close", self.close),
            ("high", self.high),
            ("low", self.low),
            ("volume", self.volume),
            ("amount", self.amount),
        ];
        let optional = [
            ("amplitude", self.amplitude),
            ("pct_change", self.pct_change),
            ("change", self.change),
            ("turnover", self.turnover),
        ];
        fields.extend(
            optional
                .into_iter()
                .filter_map(|(name, value)| value.map(|v| (name, v))),
        );
        fields
    }
}

// ============================================================================
// Records
// ============================================================================

/// A single stored field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

/// Merged record for one `(date, entity_id)` key.
///
/// A write always replaces the whole record for its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub entity_id: String,
    pub date: NaiveDate,
    pub fields: BTreeMap<String, FieldValue>,
}

impl IngestionRecord {
    pub fn new(entity_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            entity_id: entity_id.into(),
            date,
            fields: BTreeMap::new(),
        }
    }

    /// Numeric field lookup.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(FieldValue::as_f64)
    }
}

/// Field listing which variants contributed to a merged record.
pub const VARIANTS_FIELD: &str = "variants";

/// Merge per-variant bar series on `date`.
///
/// The join is an outer join: a date present in only some variants still
/// yields a record, and its `variants` field names the contributors. Output
/// is ordered by date.
pub fn merge_variants(
    entity_id: &str,
    series: &[(Variant, Vec<DailyBar>)],
) -> Vec<IngestionRecord> {
    let mut by_date: BTreeMap<NaiveDate, (IngestionRecord, Vec<&'static str>)> = BTreeMap::new();

    for (variant, bars) in series {
        let prefix = variant.field_prefix();
        for bar in bars {
            let (record, contributors) = by_date
                .entry(bar.date)
                .or_insert_with(|| (IngestionRecord::new(entity_id, bar.date), Vec::new()));

            for (name, value) in bar.named_fields() {
                record
                    .fields
                    .insert(format!("{prefix}{name}"), FieldValue::Number(value));
            }
            if !contributors.contains(&variant.tag()) {
                contributors.push(variant.tag());
            }
        }
    }

    by_date
        .into_values()
        .map(|(mut record, contributors)| {
            record.fields.insert(
                VARIANTS_FIELD.to_string(),
                FieldValue::Text(contributors.join(",")),
            );
            record
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(date: &str, close: f64) -> DailyBar {
        DailyBar {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close - 0.1,
            close,
            high: close + 0.2,
            low: close - 0.3,
            volume: 1_000.0,
            amount: close * 100_000.0,
            amplitude: None,
            pct_change: Some(1.5),
            change: None,
            turnover: None,
        }
    }

    #[test]
    fn test_variant_prefixes_are_distinct() {
        let prefixes: Vec<_> = Variant::ALL.iter().map(|v| v.field_prefix()).collect();
        assert_eq!(prefixes, vec!["", "qfq_", "hfq_"]);
        assert_eq!(Variant::BackwardAdjusted.fqt(), 2);
        assert_eq!(Variant::ForwardAdjusted.to_string(), "qfq");
    }

    #[test]
    fn test_merge_on_shared_dates() {
        let series = vec![
            (Variant::Raw, vec![bar("2024-01-02", 10.0), bar("2024-01-03", 10.5)]),
            (Variant::ForwardAdjusted, vec![bar("2024-01-02", 9.0), bar("2024-01-03", 9.5)]),
            (Variant::BackwardAdjusted, vec![bar("2024-01-02", 30.0), bar("2024-01-03", 31.5)]),
        ];

        let records = merge_variants("600000.SH", &series);
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.entity_id, "600000.SH");
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(first.number("close"), Some(10.0));
        assert_eq!(first.number("qfq_close"), Some(9.0));
        assert_eq!(first.number("hfq_close"), Some(30.0));
        assert_eq!(first.number("pct_change"), Some(1.5));
        assert!(first.fields.get("amplitude").is_none());
        assert_eq!(
            first.fields.get(VARIANTS_FIELD),
            Some(&FieldValue::Text("raw,qfq,hfq".into()))
        );
    }

    #[test]
    fn test_merge_keeps_dates_missing_from_some_variants() {
        let series = vec![
            (Variant::Raw, vec![bar("2024-01-02", 10.0), bar("2024-01-03", 10.5)]),
            (Variant::ForwardAdjusted, vec![bar("2024-01-03", 9.5)]),
        ];

        let records = merge_variants("000001.SZ", &series);
        assert_eq!(records.len(), 2);
        assert!(records[0].number("qfq_close").is_none());
        assert_eq!(
            records[0].fields.get(VARIANTS_FIELD),
            Some(&FieldValue::Text("raw".into()))
        );
        assert_eq!(records[1].number("qfq_close"), Some(9.5));
    }

    #[test]
    fn test_merge_orders_by_date() {
        let series = vec![(
            Variant::Raw,
            vec![bar("2024-01-05", 1.0), bar("2024-01-02", 1.0), bar("2024-01-03", 1.0)],
        )];
        let dates: Vec<_> = merge_variants("x", &series).into_iter().map(|r| r.date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);
    }

    #[test]
    fn test_merge_empty_series() {
        assert!(merge_variants("x", &[(Variant::Raw, vec![])]).is_empty());
    }

    #[test]
    fn test_field_value_json_shape() {
        let json = serde_json::to_string(&FieldValue::Number(1.5)).unwrap();
        assert_eq!(json, "1.5");
        let text: FieldValue = serde_json::from_str("\"raw\"").unwrap();
        assert_eq!(text, FieldValue::Text("raw".into()));
    }
}

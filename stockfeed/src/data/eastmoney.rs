//! eastmoney kline source for A-share daily history.
//!
//! One request per (stock, variant): `klt=101` selects daily bars and `fqt`
//! selects the price adjustment. Requests are spaced by a minimum interval
//! because the endpoint starts refusing bursts long before any documented
//! limit.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use stockfeed_common::config::SourceConfig;

use super::provider::{DataSource, SourceError};
use super::{DailyBar, Variant};

/// Daily kline type
const KLT_DAILY: u32 = 101;

/// Upper bound on bars per request; covers ~40 years of trading days
const MAX_BARS: u32 = 10_000;

// ============================================================================
// Symbol Mapping
// ============================================================================

/// Convert "600000.SH" style codes to eastmoney secid ("1.600000").
fn to_secid(entity_id: &str) -> Option<String> {
    let (code, exchange) = entity_id.split_once('.')?;
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let market = match exchange.to_uppercase().as_str() {
        "SZ" | "BJ" => "0",
        "SH" => "1",
        _ => return None,
    };

    Some(format!("{}.{}", market, code))
}

// ============================================================================
// Eastmoney Source
// ============================================================================

/// Daily history source backed by the eastmoney kline API.
pub struct EastmoneySource {
    client: reqwest::Client,
    kline_url: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl EastmoneySource {
    /// Create a source from configuration.
    pub fn new(config: &SourceConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            kline_url: config.kline_url.clone(),
            min_interval: config.min_request_interval(),
            last_request: Mutex::new(None),
        }
    }

    /// Wait until at least `min_interval` has passed since the previous request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn build_url(&self, secid: &str, start: NaiveDate, end: NaiveDate, variant: Variant) -> String {
        format!(
            "{}?secid={}&klt={}&fqt={}&lmt={}&beg={}&end={}&fields1=f1,f2,f3,f4,f5,f6&fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61",
            self.kline_url,
            secid,
            KLT_DAILY,
            variant.fqt(),
            MAX_BARS,
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
        )
    }
}

#[async_trait]
impl DataSource for EastmoneySource {
    fn name(&self) -> &'static str {
        "eastmoney"
    }

    async fn fetch(
        &self,
        entity_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        variant: Variant,
    ) -> Result<Vec<DailyBar>, SourceError> {
        let secid =
            to_secid(entity_id).ok_or_else(|| SourceError::InvalidSymbol(entity_id.to_string()))?;
        let url = self.build_url(&secid, start, end, variant);

        self.pace().await;
        debug!(entity = entity_id, %variant, %start, %end, "Fetching daily klines");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::http(status.as_u16()));
        }

        let body: KlineResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        if body.rc != 0 {
            return Err(SourceError::Upstream(format!("rc={}", body.rc)));
        }

        let klines = body.data.and_then(|d| d.klines).unwrap_or_default();
        parse_klines(&klines)
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

#[derive(Debug, Deserialize)]
struct KlineResponse {
    /// Return code (0 = success)
    rc: i32,
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    klines: Option<Vec<String>>,
}

/// Parse kline strings.
///
/// Format: `date,open,close,high,low,volume,amount,amplitude,pct_chg,chg,turnover`.
/// Lines with fewer than seven columns are skipped; the trailing four
/// columns are optional.
fn parse_klines(klines: &[String]) -> Result<Vec<DailyBar>, SourceError> {
    let mut bars = Vec::with_capacity(klines.len());

    for line in klines {
        let parts: Vec<&str> = line.split(',').collect();
        if parts.len() < 7 {
            warn!(line = %line, "Invalid kline format, skipping");
            continue;
        }

        let date = NaiveDate::parse_from_str(parts[0], "%Y-%m-%d")
            .map_err(|e| SourceError::Malformed(format!("date {:?}: {}", parts[0], e)))?;
        let number = |idx: usize, name: &str| -> Result<f64, SourceError> {
            parts[idx]
                .parse::<f64>()
                .map_err(|e| SourceError::Malformed(format!("{} {:?}: {}", name, parts[idx], e)))
        };
        let optional = |idx: usize| parts.get(idx).and_then(|p| p.parse::<f64>().ok());

        bars.push(DailyBar {
            date,
            open: number(1, "open")?,
            close: number(2, "close")?,
            high: number(3, "high")?,
            low: number(4, "low")?,
            volume: number(5, "volume")?,
            amount: number(6, "amount")?,
            amplitude: optional(7),
            pct_change: optional(8),
            change: optional(9),
            turnover: optional(10),
        });
    }

    bars.sort_by_key(|b| b.date);
    Ok(bars)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_secid() {
        assert_eq!(to_secid("000001.SZ"), Some("0.000001".to_string()));
        assert_eq!(to_secid("600000.sh"), Some("1.600000".to_string()));
        assert_eq!(to_secid("830799.BJ"), Some("0.830799".to_string()));
        assert_eq!(to_secid("INVALID"), None);
        assert_eq!(to_secid("ABC.SH"), None);
        assert_eq!(to_secid("600000.HK"), None);
    }

    #[test]
    fn test_parse_full_line() {
        let lines = vec![
            "2024-01-03,10.60,10.70,10.80,10.50,1200,12840000,2.83,0.94,0.10,0.62".to_string(),
            "2024-01-02,10.50,10.60,10.70,10.40,1000,10600000,2.86,0.95,0.10,0.52".to_string(),
        ];
        let bars = parse_klines(&lines).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(bars[0].open, 10.50);
        assert_eq!(bars[0].close, 10.60);
        assert_eq!(bars[0].high, 10.70);
        assert_eq!(bars[0].turnover, Some(0.52));
    }

    #[test]
    fn test_parse_short_line_skipped_and_optional_columns() {
        let lines = vec![
            "2024-01-02,10.50".to_string(),
            "2024-01-03,10.60,10.70,10.80,10.50,1200,12840000".to_string(),
        ];
        let bars = parse_klines(&lines).unwrap();
        assert_eq!(bars.len(), 1);
        assert!(bars[0].amplitude.is_none());
        assert!(bars[0].pct_change.is_none());
    }

    #[test]
    fn test_parse_bad_number_is_malformed() {
        let lines = vec!["2024-01-03,abc,10.70,10.80,10.50,1200,12840000".to_string()];
        match parse_klines(&lines) {
            Err(SourceError::Malformed(msg)) => assert!(msg.contains("open")),
            other => panic!("expected malformed error, got {:?}", other),
        }
    }

    #[test]
    fn test_url_selects_variant() {
        let source = EastmoneySource::new(&SourceConfig::default());
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let url = source.build_url("1.600000", start, end, Variant::BackwardAdjusted);
        assert!(url.contains("secid=1.600000"));
        assert!(url.contains("fqt=2"));
        assert!(url.contains("klt=101"));
        assert!(url.contains("beg=20240102"));
        assert!(url.contains("end=20240201"));
    }

    #[tokio::test]
    async fn test_invalid_symbol_fails_before_request() {
        let source = EastmoneySource::new(&SourceConfig::default());
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let err = source.fetch("bogus", day, day, Variant::Raw).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidSymbol(_)));
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_fetch_daily_klines() {
        let source = EastmoneySource::new(&SourceConfig::default());
        let start = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let bars = source
            .fetch("600000.SH", start, end, Variant::ForwardAdjusted)
            .await
            .unwrap();
        assert!(!bars.is_empty());
    }
}

//! Data source abstraction for daily history.
//!
//! Defines the `DataSource` trait the ingestion loop fetches through. A
//! source only reports *what* failed; deciding whether that failure calls
//! for a plain retry or an identity rotation is the classifier's job.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use super::{DailyBar, Variant};

// ============================================================================
// Source Error
// ============================================================================

/// Errors reported by a data source.
///
/// The `Display` text is what the error classifier sees, so HTTP failures
/// always render their numeric status.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Remote answered with a non-success HTTP status
    #[error("HTTP {status}{}", reason_suffix(.reason))]
    Http { status: u16, reason: Option<String> },

    /// Connection failed, reset, or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Remote answered but reported an application-level error
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Response body could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The entity id cannot be expressed in the source's symbol format
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Explicit request to rotate identity, used to exercise the rotation path
    #[error("FORCE_ROTATION requested")]
    ForceRotation,
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_deref().map(|r| format!(" {r}")).unwrap_or_default()
}

impl SourceError {
    /// Build an HTTP error from a status code.
    pub fn http(status: u16) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(str::to_string);
        Self::Http { status, reason }
    }
}

// ============================================================================
// Data Source Trait
// ============================================================================

/// Trait for daily history sources.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Source name used in logs and stored with every record
    fn name(&self) -> &'static str;

    /// Fetch one variant of an entity's daily bars over `[start, end]`.
    ///
    /// # Arguments
    /// * `entity_id` - Stock code (e.g., "600000.SH")
    /// * `start` - First date, inclusive
    /// * `end` - Last date, inclusive
    /// * `variant` - Price adjustment variant
    async fn fetch(
        &self,
        entity_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        variant: Variant,
    ) -> Result<Vec<DailyBar>, SourceError>;
}

// ============================================================================
// Tests
// ============================================================================

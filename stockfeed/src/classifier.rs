//! Failure classification.
//!
//! Turns a raw failure message into an [`ErrorEvent`]: is this a plain
//! transient failure, or a rate-limit/block that only a new network
//! identity will cure? All message patterns live here.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Consecutive transient failures after which the next failure escalates
/// to a rotation.
pub const DEFAULT_ESCALATION_THRESHOLD: u32 = 3;

/// HTTP statuses the upstream uses when it throttles or blocks a caller.
/// Only counted when labelled as a status, so offsets and codes elsewhere in
/// a message do not match.
static RATE_LIMIT_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:http|status(?: code)?):?\s*(?:429|403|502|503|504)\b").unwrap()
});

static RATE_LIMIT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)force[_ ]rotation|too many requests|rate[- ]?limit|forbidden|bad gateway|service unavailable|gateway time-?out",
    )
    .unwrap()
});

// ============================================================================
// Types
// ============================================================================

/// Failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry after the fixed delay
    Transient,
    /// Caller is throttled or blocked; rotate identity first
    RateLimited,
    /// Not retryable. Never produced for fetch failures; giving up is the
    /// orchestrator's call.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// A classified failure. Derived per failure, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    pub raw_message: String,
    pub classification: ErrorClass,
    pub requires_rotation: bool,
}

impl ErrorEvent {
    /// Transient failure that only needs rotation because it kept repeating.
    pub fn is_escalated(&self) -> bool {
        self.classification == ErrorClass::Transient && self.requires_rotation
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Pure failure classifier.
#[derive(Debug, Clone, Copy)]
pub struct ErrorClassifier {
    escalation_threshold: u32,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_ESCALATION_THRESHOLD)
    }
}

impl ErrorClassifier {
    pub fn new(escalation_threshold: u32) -> Self {
        Self {
            escalation_threshold,
        }
    }

    pub fn escalation_threshold(&self) -> u32 {
        self.escalation_threshold
    }

    /// Classify a failure.
    ///
    /// `consecutive_failures` counts the failures that already happened for
    /// the same entity in the current attempt sequence, not including this
    /// one.
    pub fn classify(&self, raw: &str, consecutive_failures: u32) -> ErrorEvent {
        if is_rate_limited(raw) {
            return ErrorEvent {
                raw_message: raw.to_string(),
                classification: ErrorClass::RateLimited,
                requires_rotation: true,
            };
        }

        ErrorEvent {
            raw_message: raw.to_string(),
            classification: ErrorClass::Transient,
            requires_rotation: consecutive_failures >= self.escalation_threshold,
        }
    }
}

/// Classify with the default escalation threshold.
pub fn classify(raw: &str, consecutive_failures: u32) -> ErrorEvent {
    ErrorClassifier::default().classify(raw, consecutive_failures)
}

fn is_rate_limited(raw: &str) -> bool {
    RATE_LIMIT_STATUS.is_match(raw) || RATE_LIMIT_PHRASE.is_match(raw)
}

// ============================================================================
// Tests
// ============================================================================

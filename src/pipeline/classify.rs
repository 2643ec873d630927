//! Classification of upstream errors.
//!
//! The generation service does not return structured error codes for the
//! conditions the pipeline cares about. What it returns is an HTTP status and
//! a free-text message. This module turns that pair into one of three
//! recovery classes by matching documented signature lists:
//!
//! | Class | Signatures | Recovery |
//! |-------|------------|----------|
//! | policy block | `RECITATION`, `SAFETY`, `PROHIBITED_CONTENT`, `BLOCKLIST`, `SPII`, `blocked` | escalate the prompt once |
//! | transient | HTTP 429/500/502/503/504, `503`, `overloaded`, `unavailable`, `429`, `resource exhausted`, `timed out`, `timeout`, `connection`, `network`, `econnreset`, `fetch failed` | backoff, then next model |
//! | fatal | anything else | abort |
//!
//! Policy signatures are checked first and match case-sensitively (they are
//! upstream enum names). Transient signatures match case-insensitively.
//!
//! The lists are plain data on [`ErrorClassifier`] and can be extended with
//! [`ErrorClassifier::with_policy_signature`] and
//! [`ErrorClassifier::with_transient_signature`]. If the service starts
//! returning structured codes, only this module changes.

use crate::backend::BackendError;
use serde::{Deserialize, Serialize};

/// Policy-block signatures, matched case-sensitively.
pub const POLICY_SIGNATURES: &[&str] = &[
    "RECITATION",
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "blocked",
];

/// Transient-condition signatures, matched case-insensitively.
pub const TRANSIENT_SIGNATURES: &[&str] = &[
    "503",
    "overloaded",
    "unavailable",
    "429",
    "resource_exhausted",
    "resource exhausted",
    "timed out",
    "timeout",
    "connection",
    "network",
    "econnreset",
    "fetch failed",
];

/// HTTP statuses that are always transient.
pub const TRANSIENT_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Recovery class of a backend error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    PolicyBlock,
    Transient,
    Fatal,
}

/// Signature-based error classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassifier {
    policy_signatures: Vec<String>,
    transient_signatures: Vec<String>,
    transient_statuses: Vec<u16>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            policy_signatures: POLICY_SIGNATURES.iter().map(|s| s.to_string()).collect(),
            transient_signatures: TRANSIENT_SIGNATURES.iter().map(|s| s.to_string()).collect(),
            transient_statuses: TRANSIENT_STATUSES.to_vec(),
        }
    }
}

impl ErrorClassifier {
    /// Add a case-sensitive policy-block signature.
    pub fn with_policy_signature(mut self, signature: impl Into<String>) -> Self {
        self.policy_signatures.push(signature.into());
        self
    }

    /// Add a case-insensitive transient signature.
    pub fn with_transient_signature(mut self, signature: impl Into<String>) -> Self {
        self.transient_signatures.push(signature.into().to_lowercase());
        self
    }

    /// Treat an HTTP status as transient.
    pub fn with_transient_status(mut self, status: u16) -> Self {
        if !self.transient_statuses.contains(&status) {
            self.transient_statuses.push(status);
        }
        self
    }

    /// Classify a backend error.
    pub fn classify(&self, error: &BackendError) -> Classification {
        if self.is_policy_block(&error.message) {
            return Classification::PolicyBlock;
        }
        if error
            .status
            .is_some_and(|s| self.transient_statuses.contains(&s))
            || self.is_transient_message(&error.message)
        {
            return Classification::Transient;
        }
        Classification::Fatal
    }

    /// Classify a bare message.
    pub fn classify_message(&self, message: &str) -> Classification {
        self.classify(&BackendError::message(message))
    }

    fn is_policy_block(&self, message: &str) -> bool {
        self.policy_signatures
            .iter()
            .any(|sig| message.contains(sig.as_str()))
    }

    fn is_transient_message(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.transient_signatures
            .iter()
            .any(|sig| lower.contains(&sig.to_lowercase()))
    }
}

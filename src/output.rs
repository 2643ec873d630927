//! Result types returned by the transcription entry points.

use crate::prompts::PromptVariant;
use serde::{Deserialize, Serialize};

/// Full result of a transcription job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptOutput {
    /// Unit texts in input order, joined by the configured separator.
    pub text: String,
    /// Per-unit results in input order.
    pub units: Vec<UnitResult>,
    /// Filesystem-safe name suggested by the title model, if requested.
    pub suggested_name: Option<String>,
    /// Model that produced the last unit.
    pub model_used: Option<String>,
    /// True if any unit was produced by a model other than the primary.
    pub used_fallback: bool,
    pub stats: JobStats,
}

/// Result for one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitResult {
    /// 1-indexed position in the job.
    pub index: usize,
    pub name: String,
    /// Input the unit came from.
    pub source: String,
    /// Part number when the unit is a split fragment.
    pub part: Option<usize>,
    pub text: String,
    pub model_used: String,
    pub used_fallback: bool,
    /// Every generation attempt made for this unit, in order.
    pub attempts: Vec<TranscriptionAttempt>,
    /// Bytes sent through the upload service; 0 for inline units.
    pub uploaded_bytes: u64,
    pub duration_ms: u64,
}

impl UnitResult {
    /// Number of attempts that used the restoration prompt.
    pub fn escalations(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.prompt == PromptVariant::Restoration)
            .count()
    }
}

/// One generation request and how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionAttempt {
    pub prompt: PromptVariant,
    pub model: String,
    pub outcome: AttemptOutcome,
    /// Error text for failed attempts.
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Text,
    ContentPolicyBlock,
    TransientError,
    FatalError,
}

/// Aggregate numbers for a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_units: usize,
    pub completed_units: usize,
    pub uploaded_bytes: u64,
    pub total_attempts: usize,
    /// Units produced by a fallback model.
    pub fallback_units: usize,
    /// Attempts that used the restoration prompt.
    pub escalations: usize,
    pub total_duration_ms: u64,
}

impl JobStats {
    /// Fold one finished unit into the totals.
    pub fn record_unit(&mut self, unit: &UnitResult) {
        self.completed_units += 1;
        self.uploaded_bytes += unit.uploaded_bytes;
        self.total_attempts += unit.attempts.len();
        self.escalations += unit.escalations();
        if unit.used_fallback {
            self.fallback_units += 1;
        }
    }
}

/// What a job would do with one unit, computed without any API call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPlan {
    pub index: usize,
    pub name: String,
    pub source: String,
    pub part: Option<usize>,
    pub media_type: String,
    pub bytes: u64,
    /// Page count for PDFs that parse.
    pub pages: Option<usize>,
    /// Upload chunks; 0 when the unit is sent inline.
    pub chunks: usize,
}

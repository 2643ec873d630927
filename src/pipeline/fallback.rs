//! Model fallback: retry within a model, then move down the chain.
//!
//! ```text
//!  for model in chain:
//!      with_retry(transcribe_escalating(model))
//!        ok          → done (used_fallback = model ≠ primary)
//!        transient   → next model
//!        other error → stop, propagate
//!  chain exhausted   → last transient error
//! ```
//!
//! The two layers answer different failures. The inner retry rides out a
//! short overload of one model. The outer fallback handles a model that stays
//! unavailable for the whole retry window: the next model in the chain often
//! has capacity when the primary does not.
//!
//! Policy blocks and fatal errors are not model-capacity problems, so they
//! stop the chain immediately.

use crate::backend::GenerationBackend;
use crate::error::TranscribeError;
use crate::output::TranscriptionAttempt;
use crate::pipeline::request::{transcribe_escalating, AttemptLog, ContentRef, RequestOptions};
use crate::pipeline::retry::{with_retry, RetryPolicy};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Ordered, duplicate-free list of models to try.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChain {
    models: Vec<String>,
}

impl ModelChain {
    /// `primary` followed by `fallbacks`, all trimmed, skipping blanks and
    /// any model already in the chain.
    pub fn new<I, S>(primary: impl Into<String>, fallbacks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut models = vec![primary.into().trim().to_string()];
        for m in fallbacks {
            let m = m.as_ref().trim();
            if !m.is_empty() && !models.iter().any(|existing| existing == m) {
                models.push(m.to_string());
            }
        }
        Self { models }
    }

    pub fn primary(&self) -> &str {
        &self.models[0]
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Everything the orchestrator needs besides the content.
pub struct FallbackContext<'a> {
    pub backend: &'a dyn GenerationBackend,
    pub chain: &'a ModelChain,
    pub retry: &'a RetryPolicy,
    pub options: &'a RequestOptions,
    pub cancel: Option<&'a CancellationToken>,
    pub progress: Option<&'a ProgressCallback>,
}

/// Text for one unit plus which model produced it.
#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub text: String,
    pub model_used: String,
    pub used_fallback: bool,
    pub attempts: Vec<TranscriptionAttempt>,
}

/// Transcribe `content`, walking the model chain on transient failures.
pub async fn run_with_fallback(
    ctx: &FallbackContext<'_>,
    content: &ContentRef,
) -> Result<FallbackOutcome, TranscribeError> {
    let log = AttemptLog::default();
    let models = ctx.chain.models();
    let mut last_err = None;

    for (idx, model) in models.iter().enumerate() {
        let result = with_retry(
            ctx.retry,
            ctx.cancel,
            TranscribeError::is_transient,
            |attempt, delay, err| {
                if let Some(cb) = ctx.progress {
                    cb.on_retry(model, attempt, delay, &err.to_string());
                }
            },
            |_| transcribe_escalating(ctx.backend, content, model, ctx.options, &log),
        )
        .await;

        match result {
            Ok(text) => {
                let used_fallback = model != ctx.chain.primary();
                if used_fallback {
                    info!("Transcribed with fallback model {}", model);
                }
                return Ok(FallbackOutcome {
                    text,
                    model_used: model.clone(),
                    used_fallback,
                    attempts: log.into_inner(),
                });
            }
            Err(e) if e.is_transient() => {
                if let Some(next) = models.get(idx + 1) {
                    warn!(
                        "{} still unavailable after {} attempts, falling back to {}: {}",
                        model, ctx.retry.max_attempts, next, e
                    );
                    if let Some(cb) = ctx.progress {
                        cb.on_fallback(model, next, &e.to_string());
                    }
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| TranscribeError::Internal("model chain is empty".into())))
}

//! Transcription requests with prompt escalation.
//!
//! This module turns a piece of content (an uploaded handle or inline bytes)
//! into text with a single model. It stays thin: prompt wording
//! lives in [`crate::prompts`], retry timing in [`crate::pipeline::retry`],
//! and model choice in [`crate::pipeline::fallback`].
//!
//! ## Escalation
//!
//! Content-policy filters sometimes refuse ordinary documents (scanned
//! books trip `RECITATION`, medical scans trip `SAFETY`). Permissive safety
//! settings are the first line of defence. When a refusal still comes back,
//! [`transcribe_escalating`] resends the same content to the same model once
//! with the restoration prompt. A second refusal is final for that model.

use crate::backend::{ContentPart, GenerationBackend, GenerationRequest};
use crate::config::TranscriptionConfig;
use crate::error::TranscribeError;
use crate::output::{AttemptOutcome, TranscriptionAttempt};
use crate::pipeline::classify::{Classification, ErrorClassifier};
use crate::pipeline::input::UploadUnit;
use crate::pipeline::upload::ResourceHandle;
use crate::prompts::{PromptVariant, SYSTEM_INSTRUCTION};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// The content a request refers to.
#[derive(Debug, Clone)]
pub enum ContentRef {
    /// A finalized upload.
    Uploaded {
        handle: ResourceHandle,
        media_type: String,
    },
    /// Bytes sent inside the request.
    Inline { media_type: String, data: Arc<[u8]> },
}

impl ContentRef {
    pub fn uploaded(handle: ResourceHandle, unit: &UploadUnit) -> Self {
        ContentRef::Uploaded {
            handle,
            media_type: unit.media_type().to_string(),
        }
    }

    pub fn inline(unit: &UploadUnit) -> Self {
        ContentRef::Inline {
            media_type: unit.media_type().to_string(),
            data: unit.shared_data(),
        }
    }

    fn to_part(&self) -> ContentPart {
        match self {
            ContentRef::Uploaded { handle, media_type } => ContentPart::FileUri {
                media_type: media_type.clone(),
                uri: handle.uri().to_string(),
            },
            ContentRef::Inline { media_type, data } => ContentPart::Inline {
                media_type: media_type.clone(),
                data: Arc::clone(data),
            },
        }
    }
}

/// Request settings shared by every attempt of a job.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub system_instruction: String,
    pub permissive_safety: bool,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub classifier: ErrorClassifier,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::from_config(&TranscriptionConfig::default())
    }
}

impl RequestOptions {
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self {
            system_instruction: config
                .system_instruction
                .clone()
                .unwrap_or_else(|| SYSTEM_INSTRUCTION.to_string()),
            permissive_safety: config.permissive_safety,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            classifier: config.classifier.clone(),
        }
    }
}

/// Attempts made for one unit. Shared by reference across retries.
#[derive(Debug, Default)]
pub struct AttemptLog(Mutex<Vec<TranscriptionAttempt>>);

impl AttemptLog {
    pub fn record(&self, attempt: TranscriptionAttempt) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(attempt);
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> Vec<TranscriptionAttempt> {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build the generation request for `content` with `variant`.
pub fn build_request(
    content: &ContentRef,
    variant: PromptVariant,
    options: &RequestOptions,
) -> GenerationRequest {
    GenerationRequest {
        system_instruction: Some(options.system_instruction.clone()),
        prompt: variant.prompt().to_string(),
        content: vec![content.to_part()],
        permissive_safety: options.permissive_safety,
        temperature: Some(options.temperature),
        max_output_tokens: options.max_output_tokens,
    }
}

/// One request to one model with one prompt.
///
/// Failures are classified: policy block → [`TranscribeError::ContentPolicyBlock`],
/// transient → [`TranscribeError::Transient`], anything else →
/// [`TranscribeError::Fatal`].
pub async fn transcribe(
    backend: &dyn GenerationBackend,
    content: &ContentRef,
    model: &str,
    variant: PromptVariant,
    options: &RequestOptions,
) -> Result<String, TranscribeError> {
    let request = build_request(content, variant, options);
    debug!("Requesting transcription from {} ({} prompt)", model, variant);

    let error = match backend.generate(model, &request).await {
        Ok(reply) => match reply.into_text() {
            Ok(text) => return Ok(text),
            Err(e) => e,
        },
        Err(e) => e,
    };

    Err(match options.classifier.classify(&error) {
        Classification::PolicyBlock => TranscribeError::ContentPolicyBlock {
            model: model.to_string(),
            reason: error.message,
        },
        Classification::Transient => TranscribeError::Transient {
            model: model.to_string(),
            message: error.to_string(),
        },
        Classification::Fatal => TranscribeError::Fatal {
            model: model.to_string(),
            message: error.to_string(),
        },
    })
}

/// [`transcribe`] with the standard prompt, escalating once to the
/// restoration prompt on a policy block. Every attempt is recorded in `log`.
pub async fn transcribe_escalating(
    backend: &dyn GenerationBackend,
    content: &ContentRef,
    model: &str,
    options: &RequestOptions,
    log: &AttemptLog,
) -> Result<String, TranscribeError> {
    let mut variant = PromptVariant::Standard;
    loop {
        let result = transcribe(backend, content, model, variant, options).await;
        log.record(attempt_record(variant, model, &result));

        match result {
            Err(TranscribeError::ContentPolicyBlock { reason, .. }) if variant.escalate().is_some() => {
                warn!(
                    "{} refused the {} prompt ({}), retrying with the restoration prompt",
                    model, variant, reason
                );
                variant = PromptVariant::Restoration;
            }
            other => return other,
        }
    }
}

fn attempt_record(
    prompt: PromptVariant,
    model: &str,
    result: &Result<String, TranscribeError>,
) -> TranscriptionAttempt {
    let (outcome, detail) = match result {
        Ok(_) => (AttemptOutcome::Text, None),
        Err(e @ TranscribeError::ContentPolicyBlock { .. }) => {
            (AttemptOutcome::ContentPolicyBlock, Some(e.to_string()))
        }
        Err(e @ TranscribeError::Transient { .. }) => {
            (AttemptOutcome::TransientError, Some(e.to_string()))
        }
        Err(e) => (AttemptOutcome::FatalError, Some(e.to_string())),
    };
    TranscriptionAttempt {
        prompt,
        model: model.to_string(),
        outcome,
        detail,
    }
}

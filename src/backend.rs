//! Seams between the pipeline and the remote service.
//!
//! The pipeline never talks HTTP directly. It goes through two traits:
//!
//! * [`GenerationBackend`] sends one generation request to one model.
//! * [`UploadTransport`] carries the two request kinds of the resumable
//!   upload protocol (session negotiation and chunk transfer).
//!
//! [`crate::gemini::GeminiClient`] implements both against the Generative
//! Language API. Tests implement them with scripted in-memory stubs, which is
//! how retry, escalation and fallback behaviour is exercised without network.
//!
//! Errors crossing these seams are unstructured
//! ([`BackendError`]: an optional HTTP status plus a message). Classification
//! into policy-block / transient / fatal happens on the pipeline side, in
//! [`crate::pipeline::classify`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Finish or block reasons that mean the model refused to answer.
pub const BLOCKING_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

/// An error returned by a backend or transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// HTTP status, when the failure was an HTTP reply.
    pub status: Option<u16>,
    /// Upstream or transport message.
    pub message: String,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "HTTP {}: {}", code, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}

impl BackendError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Error carrying an HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(Some(status), message)
    }

    /// Error without an HTTP status (connection failure, bad reply, …).
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    /// The error produced when the model refuses to answer.
    pub fn blocked(reason: &str) -> Self {
        Self::message(format!("Response was blocked due to {}", reason))
    }
}

// ── Generation ───────────────────────────────────────────────────────────

/// Content attached to a generation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// Reference to a finalized upload.
    FileUri { media_type: String, uri: String },
    /// Raw bytes sent inline (base64 on the wire).
    Inline { media_type: String, data: Arc<[u8]> },
}

/// One generation request, independent of any wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: Option<String>,
    /// Instruction text sent before the content parts.
    pub prompt: String,
    pub content: Vec<ContentPart>,
    /// Ask the service to disable its safety filters.
    pub permissive_safety: bool,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl GenerationRequest {
    /// A text-only request with default settings.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            system_instruction: None,
            prompt: prompt.into(),
            content: Vec::new(),
            permissive_safety: false,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

/// What came back from one generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationReply {
    /// Concatenated text of the first candidate, if it had any.
    pub text: Option<String>,
    /// `finishReason` of the first candidate.
    pub finish_reason: Option<String>,
    /// `promptFeedback.blockReason`.
    pub block_reason: Option<String>,
    /// Number of candidates in the reply.
    pub candidate_count: usize,
}

impl GenerationReply {
    /// A reply with one candidate carrying `text`.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            finish_reason: Some("STOP".into()),
            block_reason: None,
            candidate_count: 1,
        }
    }

    /// A reply refused at prompt level with `reason`.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            block_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Turn the reply into the transcribed text.
    ///
    /// A block reason (prompt-level, or a blocking finish reason even after
    /// partial text) becomes `"Response was blocked due to <REASON>"`. A reply
    /// with no candidates and no block reason is malformed. A candidate without text is a blank
    /// page and yields an empty string.
    pub fn into_text(self) -> Result<String, BackendError> {
        if let Some(reason) = self.block_reason {
            return Err(BackendError::blocked(&reason));
        }
        if self.candidate_count == 0 {
            return Err(BackendError::message(
                "Malformed response: no candidates returned",
            ));
        }
        if let Some(reason) = self.finish_reason.as_deref() {
            // Text cut off by a block is incomplete, so it is never returned.
            if BLOCKING_REASONS.contains(&reason) {
                return Err(BackendError::blocked(reason));
            }
        }
        Ok(self.text.unwrap_or_default())
    }
}

/// Sends generation requests to a named model.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationReply, BackendError>;
}

// ── Upload ───────────────────────────────────────────────────────────────

/// Session negotiation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub display_name: String,
    pub media_type: String,
    pub total_size: u64,
}

/// Whether more chunks follow or this chunk completes the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadCommand {
    Continue,
    Finalize,
}

impl UploadCommand {
    /// Value of the `X-Goog-Upload-Command` header.
    pub fn header_value(&self) -> &'static str {
        match self {
            UploadCommand::Continue => "upload",
            UploadCommand::Finalize => "upload, finalize",
        }
    }
}

/// Raw reply from the upload service. Interpretation is the upload state
/// machine's job, not the transport's.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    /// `x-goog-upload-url` header.
    pub upload_url: Option<String>,
    /// `x-goog-upload-status` header (`active`, `final`, …).
    pub upload_status: Option<String>,
    pub body: String,
}

impl TransportReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_incomplete(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

/// Carries the requests of the resumable upload protocol.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Negotiation endpoint, recorded on each session.
    fn endpoint(&self) -> String;

    /// Start a session. The session URL comes back in `upload_url`.
    async fn start_session(&self, request: &SessionRequest) -> Result<TransportReply, BackendError>;

    /// Send `data` at byte `offset` of the session.
    async fn put_chunk(
        &self,
        session_url: &str,
        offset: u64,
        command: UploadCommand,
        data: &[u8],
    ) -> Result<TransportReply, BackendError>;
}

//! Error types for the edgequake-transcribe library.
//!
//! Errors fall into four classes that drive every recovery decision in the
//! pipeline (see [`ErrorClass`]):
//!
//! * **Input validation**: missing file, missing API key, empty input.
//!   Surfaced immediately, never retried.
//! * **Content-policy block**: the model refused to answer. Recovered once
//!   per model by switching to the restoration prompt.
//! * **Transient**: overload, rate limit, network blip. Retried with
//!   exponential backoff inside a model, then the next model in the chain.
//! * **Fatal**: everything else, including malformed upstream replies and
//!   every [`UploadError`]. Aborts the unit and the job.

use std::path::PathBuf;
use thiserror::Error;

/// Recovery class of an error. Decides retry, escalation and fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorClass {
    /// Bad input or configuration. Never retried.
    InputValidation,
    /// Upstream refused to generate because of a policy classification.
    PolicyBlock,
    /// Expected to resolve on retry.
    Transient,
    /// Structural failure. Retrying will not help.
    Fatal,
}

/// All errors returned by the edgequake-transcribe library.
#[derive(Debug, Error)]
pub enum TranscribeError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// The input resolved to zero bytes.
    #[error("Input '{name}' is empty; there is nothing to transcribe")]
    EmptyInput { name: String },

    /// No inputs were given at all.
    #[error("No input files given")]
    NoInputs,

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Neither a configured nor a caller-supplied API key is available.
    #[error("No Gemini API key available.\nSet GEMINI_API_KEY or pass --api-key <KEY>.")]
    MissingApiKey,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Upload errors ─────────────────────────────────────────────────────
    /// The resumable upload of a unit failed.
    #[error("Upload of '{unit}' failed: {source}")]
    Upload {
        unit: String,
        #[source]
        source: UploadError,
    },

    // ── Generation errors ─────────────────────────────────────────────────
    /// The model refused the content, even after prompt escalation.
    #[error("Model '{model}' blocked the content: {reason}")]
    ContentPolicyBlock { model: String, reason: String },

    /// Overload, rate limit or network failure on the generation endpoint.
    #[error("Model '{model}' is temporarily unavailable: {message}")]
    Transient { model: String, message: String },

    /// Non-recoverable generation failure (bad request, malformed reply, …).
    #[error("Model '{model}' failed: {message}")]
    Fatal { model: String, message: String },

    // ── Job errors ────────────────────────────────────────────────────────
    /// A unit failed and the job stopped. Text already produced is kept in
    /// `partial_text` so callers can still show or save it.
    #[error("Job aborted at unit {unit} ('{name}') after {completed}/{total} units: {source}")]
    JobAborted {
        unit: usize,
        name: String,
        completed: usize,
        total: usize,
        partial_text: String,
        #[source]
        source: Box<TranscribeError>,
    },

    /// The caller cancelled the job.
    #[error("Transcription cancelled")]
    Cancelled,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TranscribeError {
    /// Recovery class of this error. `JobAborted` reports the class of the
    /// unit error that caused it.
    pub fn class(&self) -> ErrorClass {
        match self {
            TranscribeError::FileNotFound { .. }
            | TranscribeError::PermissionDenied { .. }
            | TranscribeError::InvalidInput { .. }
            | TranscribeError::EmptyInput { .. }
            | TranscribeError::NoInputs
            | TranscribeError::DownloadFailed { .. }
            | TranscribeError::DownloadTimeout { .. }
            | TranscribeError::MissingApiKey
            | TranscribeError::InvalidConfig(_) => ErrorClass::InputValidation,
            TranscribeError::ContentPolicyBlock { .. } => ErrorClass::PolicyBlock,
            TranscribeError::Transient { .. } => ErrorClass::Transient,
            TranscribeError::JobAborted { source, .. } => source.class(),
            TranscribeError::Upload { .. }
            | TranscribeError::Fatal { .. }
            | TranscribeError::Cancelled
            | TranscribeError::OutputWriteFailed { .. }
            | TranscribeError::Internal(_) => ErrorClass::Fatal,
        }
    }

    /// True when retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Text accumulated before the job stopped, if any.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            TranscribeError::JobAborted { partial_text, .. } if !partial_text.is_empty() => {
                Some(partial_text)
            }
            _ => None,
        }
    }
}

/// Marker returned by waits that were interrupted by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl From<Cancelled> for TranscribeError {
    fn from(_: Cancelled) -> Self {
        TranscribeError::Cancelled
    }
}

/// Failures of the resumable upload protocol.
///
/// None of these are retried: a failed session is discarded and the unit fails.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum UploadError {
    /// Session negotiation returned a non-success status.
    #[error("upload session rejected (HTTP {status}): {body}")]
    SessionRejected { status: u16, body: String },

    /// Session negotiation succeeded but no session URL came back.
    #[error("upload service did not return a session URL")]
    MissingSessionUrl,

    /// A chunk was answered with an unexpected status.
    #[error("chunk at offset {offset} rejected (HTTP {status}): {body}")]
    ChunkRejected { offset: u64, status: u16, body: String },

    /// The service finalized the upload before the last chunk was sent.
    #[error("upload finalized early at offset {offset}")]
    PrematureFinalization { offset: u64 },

    /// The final chunk was acknowledged without finalizing the upload.
    #[error("final chunk at offset {offset} was not finalized (HTTP {status})")]
    NotFinalized { offset: u64, status: u16 },

    /// The finalization reply had no `file.uri`.
    #[error("finalization reply has no file URI: {body}")]
    MissingFileUri { body: String },

    /// Network failure talking to the upload service.
    #[error("upload transport failed: {0}")]
    Transport(String),

    /// A step was requested that the session's current state does not allow.
    #[error("upload step not allowed in state {state}")]
    InvalidState { state: String },

    /// The upload was cancelled between chunks.
    #[error("upload cancelled after {sent} of {total} bytes")]
    Cancelled { sent: u64, total: u64 },
}

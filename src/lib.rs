//! # edgequake-transcribe
//!
//! Transcribe scanned documents and images to plain text with Gemini, without
//! losing progress when the service misbehaves.
//!
//! ## Why this crate?
//!
//! Sending a 300-page scan to a generative model in one request fails in
//! several ways: the reply is truncated, the upload exceeds request-body
//! limits, content filters refuse ordinary book pages as "recitation", and
//! the model is regularly overloaded. This crate wraps the model call in a
//! pipeline that handles each of those failures and keeps every page of text
//! already recovered.
//!
//! ## Pipeline Overview
//!
//! ```text
//! inputs (paths / URLs, in order)
//!  │
//!  ├─ 1. Input     resolve local file or download from URL, detect media type
//!  ├─ 2. Split     PDFs over N pages → page-bounded parts (lopdf, spawn_blocking)
//!  ├─ 3. Upload    resumable chunked upload, explicit state machine
//!  ├─ 4. Request   generateContent; policy block → restoration prompt once
//!  ├─ 5. Fallback  backoff retries per model, then the next model in the chain
//!  ├─ 6. Job       units strictly in order, paced, text accumulated after each
//!  └─ 7. Output    joined text + per-unit model/attempt details + title
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_transcribe::{transcribe, TranscriptionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Key from GEMINI_API_KEY, or TranscriptionConfig::builder().api_key(…)
//!     let config = TranscriptionConfig::default();
//!     let output = transcribe(&["letters-1843.pdf"], &config).await?;
//!     println!("{}", output.text);
//!     eprintln!("model: {:?}, fallback used: {}", output.model_used, output.used_fallback);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `transcribe` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-transcribe = { version = "0.1", default-features = false }
//! ```
//!
//! ## Custom backends
//!
//! The pipeline only talks to the service through [`GenerationBackend`] and
//! [`UploadTransport`]. Inject your own implementations with
//! [`TranscriptionConfigBuilder::backend`] and
//! [`TranscriptionConfigBuilder::transport`] to route through a proxy or to
//! test without network access.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod gemini;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod stream;
pub mod title;
pub mod transcribe;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{
    BackendError, ContentPart, GenerationBackend, GenerationReply, GenerationRequest,
    SessionRequest, TransportReply, UploadCommand, UploadTransport,
};
pub use config::{ChunkMode, TextSeparator, TranscriptionConfig, TranscriptionConfigBuilder};
pub use error::{ErrorClass, TranscribeError, UploadError};
pub use gemini::GeminiClient;
pub use job::{Job, JobContext, JobOutcome, JobState, JobStatus};
pub use output::{
    AttemptOutcome, JobStats, TranscriptOutput, TranscriptionAttempt, UnitPlan, UnitResult,
};
pub use pipeline::classify::{Classification, ErrorClassifier};
pub use pipeline::fallback::ModelChain;
pub use pipeline::input::UploadUnit;
pub use pipeline::retry::RetryPolicy;
pub use progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
pub use prompts::PromptVariant;
pub use stream::{transcribe_stream, transcribe_stream_from_bytes, UnitStream};
pub use transcribe::{plan, transcribe, transcribe_bytes, transcribe_sync, transcribe_to_file};

//! Configuration types for a transcription job.
//!
//! All job behaviour is controlled through [`TranscriptionConfig`], built via
//! its [`TranscriptionConfigBuilder`]. Every knob lives in one struct so a
//! config can be cloned into the stream API, logged, and diffed between runs.
//!
//! # Credentials
//! The API key and the primary model are resolved when a job starts, not when
//! the config is built. See [`resolve_api_key`] and [`resolve_model`].

use crate::backend::{GenerationBackend, UploadTransport};
use crate::error::TranscribeError;
use crate::pipeline::classify::ErrorClassifier;
use crate::pipeline::retry::RetryPolicy;
use crate::progress::{JobProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Primary model when neither the caller nor the environment names one.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Prioritised fallback list appended after the primary model.
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &["gemini-2.5-flash", "gemini-2.0-flash"];

/// Model used for the filename suggestion.
pub const DEFAULT_TITLE_MODEL: &str = "gemini-2.5-flash";

/// Chunk size when talking to the upload service directly: 8 MiB.
pub const DIRECT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Chunk size when the upload goes through a proxy with a ~4.5 MB body cap: 2 MiB.
pub const PROXIED_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// The upload service requires chunk sizes in multiples of 256 KiB.
pub const MIN_CHUNK_SIZE: usize = 256 * 1024;

/// Pages per split unit; sized for the model's input/output budget.
pub const DEFAULT_MAX_PAGES_PER_UNIT: usize = 10;

/// Environment variable holding the configured (server-side) API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment variable holding the configured default model.
pub const MODEL_ENV: &str = "GEMINI_MODEL_NAME";

/// Configuration for a transcription job.
///
/// Built via [`TranscriptionConfig::builder()`] or using
/// [`TranscriptionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_transcribe::{ChunkMode, TranscriptionConfig};
///
/// let config = TranscriptionConfig::builder()
///     .model("gemini-2.5-pro")
///     .chunk_mode(ChunkMode::Proxied)
///     .max_pages_per_unit(8)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct TranscriptionConfig {
    /// Caller-requested primary model. If None, `GEMINI_MODEL_NAME` or
    /// [`DEFAULT_MODEL`] is used.
    pub model: Option<String>,

    /// Models tried, in order, after the primary model is exhausted on
    /// transient errors. Duplicates of the primary are dropped.
    pub fallback_models: Vec<String>,

    /// Caller-supplied API key. Used only when `GEMINI_API_KEY` is unset.
    pub api_key: Option<String>,

    /// Pre-constructed generation backend. Takes precedence over the key.
    pub backend: Option<Arc<dyn GenerationBackend>>,

    /// Pre-constructed upload transport. Takes precedence over the key.
    pub transport: Option<Arc<dyn UploadTransport>>,

    /// Retry schedule inside one model. Default: 3 attempts, 1500 ms base
    /// (waits of 1.5 s, 3 s, 6 s …).
    pub retry: RetryPolicy,

    /// Byte-range size for resumable uploads. Default: [`ChunkMode::Direct`].
    pub chunk_mode: ChunkMode,

    /// Split PDFs with more pages than `max_pages_per_unit`. Default: true.
    pub split_documents: bool,

    /// Maximum pages per split unit. Default: 10.
    pub max_pages_per_unit: usize,

    /// Units up to this many bytes are sent inline instead of uploaded.
    /// Default: 0 (always upload).
    pub inline_limit_bytes: usize,

    /// Pause between consecutive units in milliseconds. Default: 500.
    ///
    /// This is rate-limit pacing, not error recovery: it is never applied
    /// after the last unit.
    pub unit_pacing_ms: u64,

    /// Separator between unit texts in the accumulated output.
    pub separator: TextSeparator,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum output tokens per request. None leaves the model default.
    pub max_output_tokens: Option<u32>,

    /// Ask for `BLOCK_NONE` on every harm category. Default: true.
    pub permissive_safety: bool,

    /// Custom system instruction. If None, uses the built-in one.
    pub system_instruction: Option<String>,

    /// Error signatures used for policy-block / transient classification.
    pub classifier: ErrorClassifier,

    /// Apply [`crate::pipeline::postprocess::clean_text`] to each unit's text.
    /// Default: true.
    pub clean_output: bool,

    /// Ask the model for a filename once all units are done. Default: true.
    pub suggest_title: bool,

    /// Model used for the filename suggestion.
    pub title_model: String,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Per generation request timeout in seconds. Default: 300.
    pub api_timeout_secs: u64,

    /// Per upload request (negotiation or chunk) timeout in seconds. Default: 120.
    pub upload_timeout_secs: u64,

    /// Progress events. None means no events are emitted.
    pub progress_callback: Option<ProgressCallback>,

    /// Caller-level abort. Checked before every unit, chunk and retry wait.
    pub cancel_token: Option<CancellationToken>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: None,
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            api_key: None,
            backend: None,
            transport: None,
            retry: RetryPolicy::default(),
            chunk_mode: ChunkMode::default(),
            split_documents: true,
            max_pages_per_unit: DEFAULT_MAX_PAGES_PER_UNIT,
            inline_limit_bytes: 0,
            unit_pacing_ms: 500,
            separator: TextSeparator::default(),
            temperature: 0.1,
            max_output_tokens: None,
            permissive_safety: true,
            system_instruction: None,
            classifier: ErrorClassifier::default(),
            clean_output: true,
            suggest_title: true,
            title_model: DEFAULT_TITLE_MODEL.to_string(),
            download_timeout_secs: 120,
            api_timeout_secs: 300,
            upload_timeout_secs: 120,
            progress_callback: None,
            cancel_token: None,
        }
    }
}

impl fmt::Debug for TranscriptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscriptionConfig")
            .field("model", &self.model)
            .field("fallback_models", &self.fallback_models)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("backend", &self.backend.as_ref().map(|_| "<dyn GenerationBackend>"))
            .field("transport", &self.transport.as_ref().map(|_| "<dyn UploadTransport>"))
            .field("retry", &self.retry)
            .field("chunk_mode", &self.chunk_mode)
            .field("split_documents", &self.split_documents)
            .field("max_pages_per_unit", &self.max_pages_per_unit)
            .field("inline_limit_bytes", &self.inline_limit_bytes)
            .field("unit_pacing_ms", &self.unit_pacing_ms)
            .field("separator", &self.separator)
            .field("temperature", &self.temperature)
            .field("permissive_safety", &self.permissive_safety)
            .field("clean_output", &self.clean_output)
            .field("suggest_title", &self.suggest_title)
            .finish()
    }
}

impl TranscriptionConfig {
    /// Create a new builder for `TranscriptionConfig`.
    pub fn builder() -> TranscriptionConfigBuilder {
        TranscriptionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Pause applied between two consecutive units.
    pub fn unit_pacing(&self) -> Duration {
        Duration::from_millis(self.unit_pacing_ms)
    }

    /// True once the caller has requested cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

/// Builder for [`TranscriptionConfig`].
#[derive(Debug)]
pub struct TranscriptionConfigBuilder {
    config: TranscriptionConfig,
}

impl TranscriptionConfigBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn fallback_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.fallback_models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn UploadTransport>) -> Self {
        self.config.transport = Some(transport);
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.retry.max_attempts = n.max(1);
        self
    }

    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry.base_delay = Duration::from_millis(ms);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn chunk_mode(mut self, mode: ChunkMode) -> Self {
        self.config.chunk_mode = mode;
        self
    }

    pub fn split_documents(mut self, v: bool) -> Self {
        self.config.split_documents = v;
        self
    }

    pub fn max_pages_per_unit(mut self, n: usize) -> Self {
        self.config.max_pages_per_unit = n.max(1);
        self
    }

    pub fn inline_limit_bytes(mut self, n: usize) -> Self {
        self.config.inline_limit_bytes = n;
        self
    }

    pub fn unit_pacing_ms(mut self, ms: u64) -> Self {
        self.config.unit_pacing_ms = ms;
        self
    }

    pub fn separator(mut self, sep: TextSeparator) -> Self {
        self.config.separator = sep;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: u32) -> Self {
        self.config.max_output_tokens = Some(n);
        self
    }

    pub fn permissive_safety(mut self, v: bool) -> Self {
        self.config.permissive_safety = v;
        self
    }

    pub fn system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.system_instruction = Some(instruction.into());
        self
    }

    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.config.classifier = classifier;
        self
    }

    pub fn clean_output(mut self, v: bool) -> Self {
        self.config.clean_output = v;
        self
    }

    pub fn suggest_title(mut self, v: bool) -> Self {
        self.config.suggest_title = v;
        self
    }

    pub fn title_model(mut self, model: impl Into<String>) -> Self {
        self.config.title_model = model.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn JobProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.config.cancel_token = Some(token);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<TranscriptionConfig, TranscribeError> {
        let c = &self.config;
        if c.retry.max_attempts == 0 {
            return Err(TranscribeError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(TranscribeError::InvalidConfig(
                "model name must not be empty".into(),
            ));
        }
        if c.fallback_models.iter().any(|m| m.trim().is_empty()) {
            return Err(TranscribeError::InvalidConfig(
                "fallback model names must not be empty".into(),
            ));
        }
        let chunk_size = c.chunk_mode.chunk_size();
        if chunk_size < MIN_CHUNK_SIZE || chunk_size % MIN_CHUNK_SIZE != 0 {
            return Err(TranscribeError::InvalidConfig(format!(
                "chunk size must be a non-zero multiple of {} bytes, got {}",
                MIN_CHUNK_SIZE, chunk_size
            )));
        }
        if c.max_pages_per_unit == 0 {
            return Err(TranscribeError::InvalidConfig(
                "max_pages_per_unit must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Credential resolution ────────────────────────────────────────────────

/// Pick the API key: the configured (server-side) key wins, the caller's key
/// fills the gap. Blank strings count as absent.
///
/// Returns [`TranscribeError::MissingApiKey`] when neither is usable; this is
/// an input-validation failure and is never retried.
pub fn resolve_api_key(
    configured: Option<&str>,
    caller: Option<&str>,
) -> Result<String, TranscribeError> {
    configured
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or_else(|| caller.map(str::trim).filter(|k| !k.is_empty()))
        .map(str::to_string)
        .ok_or(TranscribeError::MissingApiKey)
}

/// Pick the primary model: the caller's non-blank choice, then the configured
/// default, then [`DEFAULT_MODEL`].
pub fn resolve_model(caller: Option<&str>, configured: Option<&str>) -> String {
    caller
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .or_else(|| configured.map(str::trim).filter(|m| !m.is_empty()))
        .unwrap_or(DEFAULT_MODEL)
        .to_string()
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Byte-range size used for resumable uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChunkMode {
    /// Straight to the upload service: 8 MiB ranges. (default)
    #[default]
    Direct,
    /// Through a proxy with a small request-body limit: 2 MiB ranges.
    Proxied,
    /// Explicit size in bytes, a multiple of 256 KiB.
    Custom(usize),
}

impl ChunkMode {
    /// Chunk size in bytes.
    pub fn chunk_size(&self) -> usize {
        match self {
            ChunkMode::Direct => DIRECT_CHUNK_SIZE,
            ChunkMode::Proxied => PROXIED_CHUNK_SIZE,
            ChunkMode::Custom(n) => *n,
        }
    }
}

/// How to separate unit texts in the accumulated output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextSeparator {
    /// Blank line: "\n\n". (default)
    #[default]
    BlankLine,
    /// Horizontal rule: "\n\n---\n\n"
    HorizontalRule,
    /// Marker with the 1-indexed unit number: "\n\n<!-- unit N -->\n\n"
    Marker,
    /// Custom string inserted between units.
    Custom(String),
}

impl TextSeparator {
    /// Render the separator placed before unit `unit_num` (1-indexed).
    pub fn render(&self, unit_num: usize) -> String {
        match self {
            TextSeparator::BlankLine => "\n\n".to_string(),
            TextSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            TextSeparator::Marker => format!("\n\n<!-- unit {} -->\n\n", unit_num),
            TextSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

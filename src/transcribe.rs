//! Eager entry points: run the whole job, then return.
//!
//! [`transcribe`] resolves every input, splits oversized PDFs, runs the job
//! sequencer over the resulting units and returns the accumulated text with
//! per-unit details. Use [`crate::stream::transcribe_stream`] instead to
//! receive each unit as soon as it is done.

use crate::backend::{GenerationBackend, UploadTransport};
use crate::config::{resolve_api_key, resolve_model, TranscriptionConfig, API_KEY_ENV, MODEL_ENV};
use crate::error::TranscribeError;
use crate::gemini::GeminiClient;
use crate::job::{Job, JobContext};
use crate::output::{TranscriptOutput, UnitPlan};
use crate::pipeline::input::{self, UploadUnit};
use crate::pipeline::split;
use crate::pipeline::upload::plan_chunks;
use crate::title::suggest_title;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Transcribe local files and/or URLs, in the order given.
///
/// # Errors
/// * input validation (`NoInputs`, `FileNotFound`, `MissingApiKey`, …)
///   before any request is made
/// * [`TranscribeError::JobAborted`] when a unit fails; the text produced
///   before the failure is in its `partial_text`
/// * [`TranscribeError::Cancelled`] when the config's token fires
pub async fn transcribe<S: AsRef<str>>(
    inputs: &[S],
    config: &TranscriptionConfig,
) -> Result<TranscriptOutput, TranscribeError> {
    if inputs.is_empty() {
        return Err(TranscribeError::NoInputs);
    }
    let services = resolve_services(config)?;
    let units = resolve_units(inputs, config).await?;
    run_units(units, services, config).await
}

/// Transcribe an in-memory document.
pub async fn transcribe_bytes(
    name: impl Into<String>,
    bytes: impl Into<Arc<[u8]>>,
    config: &TranscriptionConfig,
) -> Result<TranscriptOutput, TranscribeError> {
    let unit = UploadUnit::from_bytes(name, bytes);
    if unit.is_empty() {
        return Err(TranscribeError::EmptyInput {
            name: unit.name().to_string(),
        });
    }
    let services = resolve_services(config)?;
    let units = split_units(vec![unit], config).await?;
    run_units(units, services, config).await
}

/// Transcribe and write the text to `output_path`.
///
/// The file is written to a temporary sibling and renamed into place, so a
/// failed job never leaves a half-written file behind.
pub async fn transcribe_to_file<S: AsRef<str>>(
    inputs: &[S],
    output_path: impl AsRef<Path>,
    config: &TranscriptionConfig,
) -> Result<TranscriptOutput, TranscribeError> {
    let output = transcribe(inputs, config).await?;
    write_atomic(output_path.as_ref(), &output.text).await?;
    Ok(output)
}

/// Synchronous wrapper around [`transcribe`].
///
/// Creates a temporary tokio runtime internally.
pub fn transcribe_sync<S: AsRef<str>>(
    inputs: &[S],
    config: &TranscriptionConfig,
) -> Result<TranscriptOutput, TranscribeError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TranscribeError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(transcribe(inputs, config))
}

/// Resolve and split the inputs without calling the model.
///
/// Does not require an API key.
pub async fn plan<S: AsRef<str>>(
    inputs: &[S],
    config: &TranscriptionConfig,
) -> Result<Vec<UnitPlan>, TranscribeError> {
    if inputs.is_empty() {
        return Err(TranscribeError::NoInputs);
    }
    let units = resolve_units(inputs, config).await?;
    let chunk_size = config.chunk_mode.chunk_size() as u64;

    Ok(units
        .iter()
        .enumerate()
        .map(|(i, unit)| {
            let inline = config.inline_limit_bytes > 0 && unit.len() <= config.inline_limit_bytes;
            UnitPlan {
                index: i + 1,
                name: unit.name().to_string(),
                source: unit.source().to_string(),
                part: unit.part(),
                media_type: unit.media_type().to_string(),
                bytes: unit.len() as u64,
                pages: if unit.is_pdf() {
                    split::page_count(unit.data())
                } else {
                    None
                },
                chunks: if inline {
                    0
                } else {
                    plan_chunks(unit.len() as u64, chunk_size).len()
                },
            }
        })
        .collect())
}

// ── Shared with the stream API ───────────────────────────────────────────

pub(crate) struct Services {
    pub backend: Arc<dyn GenerationBackend>,
    pub transport: Arc<dyn UploadTransport>,
}

/// Injected services win; otherwise a [`GeminiClient`] is built from the
/// configured (`GEMINI_API_KEY`) or caller-supplied key.
pub(crate) fn resolve_services(config: &TranscriptionConfig) -> Result<Services, TranscribeError> {
    if let (Some(backend), Some(transport)) = (&config.backend, &config.transport) {
        return Ok(Services {
            backend: Arc::clone(backend),
            transport: Arc::clone(transport),
        });
    }

    let configured = std::env::var(API_KEY_ENV).ok();
    let key = resolve_api_key(configured.as_deref(), config.api_key.as_deref())?;
    let client = Arc::new(GeminiClient::new(key, config)?);
    debug!("Using Gemini client for the missing service(s)");

    Ok(Services {
        backend: config
            .backend
            .clone()
            .unwrap_or_else(|| client.clone() as Arc<dyn GenerationBackend>),
        transport: config
            .transport
            .clone()
            .unwrap_or_else(|| client as Arc<dyn UploadTransport>),
    })
}

/// Caller model, then `GEMINI_MODEL_NAME`, then the built-in default.
pub(crate) fn primary_model(config: &TranscriptionConfig) -> String {
    let configured = std::env::var(MODEL_ENV).ok();
    resolve_model(config.model.as_deref(), configured.as_deref())
}

pub(crate) async fn resolve_units<S: AsRef<str>>(
    inputs: &[S],
    config: &TranscriptionConfig,
) -> Result<Vec<UploadUnit>, TranscribeError> {
    let mut units = Vec::with_capacity(inputs.len());
    for input in inputs {
        units.push(input::resolve_input(input.as_ref(), config.download_timeout_secs).await?);
    }
    split_units(units, config).await
}

/// Split oversized PDFs, keeping input order. Runs on the blocking pool
/// because parsing large PDFs is CPU-bound.
pub(crate) async fn split_units(
    units: Vec<UploadUnit>,
    config: &TranscriptionConfig,
) -> Result<Vec<UploadUnit>, TranscribeError> {
    if !config.split_documents {
        return Ok(units);
    }
    let max_pages = config.max_pages_per_unit;
    tokio::task::spawn_blocking(move || {
        units
            .iter()
            .flat_map(|unit| split::split_unit(unit, max_pages))
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| TranscribeError::Internal(format!("split task failed: {e}")))
}

pub(crate) fn build_job(units: Vec<UploadUnit>, services: &Services, config: &TranscriptionConfig) -> Job {
    let ctx = JobContext::new(
        Arc::clone(&services.backend),
        Arc::clone(&services.transport),
        primary_model(config),
        config,
    );
    Job::new(units, ctx)
}

async fn run_units(
    units: Vec<UploadUnit>,
    services: Services,
    config: &TranscriptionConfig,
) -> Result<TranscriptOutput, TranscribeError> {
    let mut job = build_job(units, &services, config);
    let outcome = job.run().await?;

    let suggested_name = if config.suggest_title && !outcome.text.trim().is_empty() {
        Some(suggest_title(services.backend.as_ref(), &config.title_model, &outcome.text).await)
    } else {
        None
    };

    info!(
        "Transcription complete: {} unit(s), {} chars, {} ms",
        outcome.stats.completed_units,
        outcome.text.len(),
        outcome.stats.total_duration_ms
    );

    Ok(TranscriptOutput {
        text: outcome.text,
        units: outcome.units,
        suggested_name,
        model_used: outcome.model_used,
        used_fallback: outcome.used_fallback,
        stats: outcome.stats,
    })
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), TranscribeError> {
    let fail = |source| TranscribeError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await.map_err(fail)?;
    tokio::fs::rename(&tmp, path).await.map_err(fail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GenerationReply;
    use crate::config::TextSeparator;
    use crate::pipeline::split::tests::sample_pdf;
    use crate::testing::MemoryService;

    fn config_with(service: &Arc<MemoryService>) -> crate::config::TranscriptionConfigBuilder {
        TranscriptionConfig::builder()
            .backend(service.clone())
            .transport(service.clone())
            .model("gemini-2.5-flash")
            .unit_pacing_ms(0)
            .suggest_title(false)
    }

    fn write_inputs(dir: &Path, texts: &[&str]) -> Vec<String> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let path = dir.join(format!("page{}.txt", i + 1));
                std::fs::write(&path, t).unwrap();
                path.to_string_lossy().into_owned()
            })
            .collect()
    }

    #[tokio::test]
    async fn files_are_transcribed_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), &["first", "second", "third"]);
        let service = Arc::new(MemoryService::new());
        let config = config_with(&service)
            .separator(TextSeparator::Marker)
            .build()
            .unwrap();

        let out = transcribe(&inputs, &config).await.unwrap();

        assert_eq!(
            out.text,
            "first\n\n<!-- unit 2 -->\n\nsecond\n\n<!-- unit 3 -->\n\nthird"
        );
        assert_eq!(out.units.len(), 3);
        assert_eq!(out.units[0].name, "page1.txt");
        assert_eq!(out.units[0].source, inputs[0]);
        assert_eq!(out.suggested_name, None);
    }

    #[tokio::test]
    async fn no_inputs_is_rejected() {
        let inputs: Vec<String> = Vec::new();
        let err = transcribe(&inputs, &TranscriptionConfig::default()).await.unwrap_err();
        assert!(matches!(err, TranscribeError::NoInputs));
    }

    #[tokio::test]
    async fn missing_file_is_rejected_before_any_request() {
        let service = Arc::new(MemoryService::new());
        let config = config_with(&service).build().unwrap();
        let err = transcribe(&["/definitely/not/here.pdf"], &config).await.unwrap_err();
        assert!(matches!(err, TranscribeError::FileNotFound { .. }), "got {err:?}");
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_key_is_an_input_error() {
        if std::env::var(API_KEY_ENV).is_ok() {
            return;
        }
        let err = transcribe(&["whatever.pdf"], &TranscriptionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::MissingApiKey));
        assert_eq!(err.class(), crate::error::ErrorClass::InputValidation);
    }

    #[tokio::test]
    async fn title_is_suggested_from_text() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), &["Dear Margaret, the harvest was late."]);
        let service = Arc::new(MemoryService::new());
        service.script("title-model", Ok(GenerationReply::with_text("Letter to Margaret")));
        let config = config_with(&service)
            .suggest_title(true)
            .title_model("title-model")
            .build()
            .unwrap();

        let out = transcribe(&inputs, &config).await.unwrap();
        assert_eq!(out.suggested_name.as_deref(), Some("Letter_to_Margaret"));
    }

    #[tokio::test]
    async fn bytes_input_is_transcribed() {
        let service = Arc::new(MemoryService::new());
        let config = config_with(&service).build().unwrap();
        let out = transcribe_bytes("note.txt", b"in memory".to_vec(), &config).await.unwrap();
        assert_eq!(out.text, "in memory");
        assert_eq!(out.units[0].uploaded_bytes, 9);
    }

    #[tokio::test]
    async fn empty_bytes_are_rejected() {
        let service = Arc::new(MemoryService::new());
        let config = config_with(&service).build().unwrap();
        let err = transcribe_bytes("empty.pdf", Vec::new(), &config).await.unwrap_err();
        assert!(matches!(err, TranscribeError::EmptyInput { .. }));
    }

    #[tokio::test]
    async fn output_file_is_written_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_inputs(dir.path(), &["one", "two"]);
        let out_path = dir.path().join("out").join("transcript.txt");
        let service = Arc::new(MemoryService::new());
        let config = config_with(&service).build().unwrap();

        transcribe_to_file(&inputs, &out_path, &config).await.unwrap();

        assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "one\n\ntwo");
        assert!(!dir.path().join("out").join("transcript.txt.tmp").exists());
    }

    #[tokio::test]
    async fn plan_splits_large_pdfs_without_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        std::fs::write(&pdf, sample_pdf(23)).unwrap();
        let config = TranscriptionConfig::default();

        let plan = plan(&[pdf.to_string_lossy()], &config).await.unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.iter().map(|p| p.pages).collect::<Vec<_>>(),
            vec![Some(10), Some(10), Some(3)]
        );
        assert_eq!(plan[0].name, "book_part1.pdf");
        assert_eq!(plan[2].part, Some(3));
        assert!(plan.iter().all(|p| p.chunks == 1));
    }

    #[tokio::test]
    async fn splitting_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("book.pdf");
        std::fs::write(&pdf, sample_pdf(23)).unwrap();
        let config = TranscriptionConfig::builder().split_documents(false).build().unwrap();

        let plan = plan(&[pdf.to_string_lossy()], &config).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].pages, Some(23));
    }
}

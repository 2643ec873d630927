//! Streaming API: emit each unit as soon as it is transcribed.
//!
//! ## Why stream?
//!
//! A job over a long document takes minutes. Yielding [`UnitResult`]s as
//! they complete lets callers show partial text immediately, write it to
//! disk incrementally, or stop early by dropping the stream.
//!
//! Units are processed strictly in order, so items arrive in input order.
//! A failing unit is yielded as the last item (a
//! [`TranscribeError::JobAborted`] carrying the partial text) and the stream
//! ends. No filename is suggested in streaming mode; call
//! [`crate::title::suggest_title`] on the collected text if one is needed.

use crate::config::TranscriptionConfig;
use crate::error::TranscribeError;
use crate::job::Job;
use crate::output::UnitResult;
use crate::pipeline::input::UploadUnit;
use crate::transcribe::{build_job, resolve_services, resolve_units, split_units};
use futures::stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of unit results.
pub type UnitStream = Pin<Box<dyn Stream<Item = Result<UnitResult, TranscribeError>> + Send>>;

/// Transcribe `inputs`, streaming unit results in order.
///
/// # Returns
/// - `Ok(UnitStream)`: one item per unit, ending early on the first failure
/// - `Err(TranscribeError)`: input validation failed before any request
pub async fn transcribe_stream<S: AsRef<str>>(
    inputs: &[S],
    config: &TranscriptionConfig,
) -> Result<UnitStream, TranscribeError> {
    if inputs.is_empty() {
        return Err(TranscribeError::NoInputs);
    }
    let services = resolve_services(config)?;
    let units = resolve_units(inputs, config).await?;
    info!("Starting streaming transcription: {} unit(s)", units.len());
    Ok(job_stream(build_job(units, &services, config)))
}

/// Streaming variant of [`crate::transcribe::transcribe_bytes`].
pub async fn transcribe_stream_from_bytes(
    name: impl Into<String>,
    bytes: impl Into<Arc<[u8]>>,
    config: &TranscriptionConfig,
) -> Result<UnitStream, TranscribeError> {
    let unit = UploadUnit::from_bytes(name, bytes);
    if unit.is_empty() {
        return Err(TranscribeError::EmptyInput {
            name: unit.name().to_string(),
        });
    }
    let services = resolve_services(config)?;
    let units = split_units(vec![unit], config).await?;
    Ok(job_stream(build_job(units, &services, config)))
}

/// Drive `job` one unit per stream item.
pub fn job_stream(job: Job) -> UnitStream {
    Box::pin(stream::unfold(job, |mut job| async move {
        let item = job.step().await?;
        Some((item, job))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, GenerationReply};
    use crate::testing::MemoryService;
    use futures::StreamExt;

    fn config(service: &Arc<MemoryService>) -> TranscriptionConfig {
        TranscriptionConfig::builder()
            .backend(service.clone())
            .transport(service.clone())
            .model("m")
            .fallback_models(Vec::<String>::new())
            .unit_pacing_ms(0)
            .build()
            .unwrap()
    }

    fn write(dir: &std::path::Path, name: &str, text: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn yields_units_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![write(dir.path(), "a.txt", "alpha"), write(dir.path(), "b.txt", "beta")];
        let service = Arc::new(MemoryService::new());

        let results: Vec<_> = transcribe_stream(&inputs, &config(&service))
            .await
            .unwrap()
            .collect()
            .await;

        let texts: Vec<_> = results.into_iter().map(|r| r.unwrap().text).collect();
        assert_eq!(texts, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn failure_is_the_last_item() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = vec![
            write(dir.path(), "a.txt", "alpha"),
            write(dir.path(), "b.txt", "beta"),
            write(dir.path(), "c.txt", "gamma"),
        ];
        let service = Arc::new(MemoryService::new());
        service
            .script("m", Ok(GenerationReply::with_text("alpha")))
            .script("m", Err(BackendError::http(404, "models/m is not found")));

        let results: Vec<_> = transcribe_stream(&inputs, &config(&service))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.partial_text(), Some("alpha"));
        assert_eq!(service.requests().len(), 2);
    }

    #[tokio::test]
    async fn bytes_stream_yields_one_unit() {
        let service = Arc::new(MemoryService::new());
        let mut s = transcribe_stream_from_bytes("note.txt", b"hello".to_vec(), &config(&service))
            .await
            .unwrap();
        assert_eq!(s.next().await.unwrap().unwrap().text, "hello");
        assert!(s.next().await.is_none());
    }
}

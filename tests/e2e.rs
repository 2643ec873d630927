//! End-to-end tests for edgequake-transcribe.
//!
//! Most tests drive the public API against `StubService`, an in-process
//! implementation of both service traits, so they run without network.
//! The live test at the bottom calls the real Gemini API and is gated behind
//! `E2E_ENABLED` and `GEMINI_API_KEY`.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture
//!
//! Live:
//!   E2E_ENABLED=1 GEMINI_API_KEY=… cargo test --test e2e live_ -- --nocapture

use async_trait::async_trait;
use edgequake_transcribe::{
    plan, transcribe, transcribe_bytes, transcribe_stream, transcribe_sync, transcribe_to_file,
    BackendError, ChunkMode, ContentPart, ErrorClass, GenerationBackend, GenerationReply,
    GenerationRequest, JobProgressCallback, PromptVariant, SessionRequest, TextSeparator,
    TranscribeError, TranscriptionConfig, TransportReply, UploadCommand, UploadTransport,
};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Stub service ─────────────────────────────────────────────────────────────

/// Accepts resumable uploads into memory and answers generation requests
/// from a per-model queue, echoing the uploaded content when the queue is
/// empty.
#[derive(Default)]
struct StubService {
    sessions: Mutex<HashMap<String, (String, Vec<u8>)>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    chunks: Mutex<Vec<(u64, usize, UploadCommand)>>,
    queued: Mutex<HashMap<String, VecDeque<Result<GenerationReply, BackendError>>>>,
    calls: Mutex<Vec<(String, GenerationRequest)>>,
}

impl StubService {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn queue(&self, model: &str, reply: Result<GenerationReply, BackendError>) {
        self.queued
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
    }

    fn models_called(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    fn prompts_sent(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.prompt.clone())
            .collect()
    }

    fn chunk_log(&self) -> Vec<(u64, usize, UploadCommand)> {
        self.chunks.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for StubService {
    fn endpoint(&self) -> String {
        "stub://upload".into()
    }

    async fn start_session(&self, request: &SessionRequest) -> Result<TransportReply, BackendError> {
        let mut sessions = self.sessions.lock().unwrap();
        let url = format!("stub://session/{}", sessions.len() + 1);
        sessions.insert(url.clone(), (request.display_name.clone(), Vec::new()));
        Ok(TransportReply {
            status: 200,
            upload_url: Some(url),
            upload_status: Some("active".into()),
            body: String::new(),
        })
    }

    async fn put_chunk(
        &self,
        session_url: &str,
        offset: u64,
        command: UploadCommand,
        data: &[u8],
    ) -> Result<TransportReply, BackendError> {
        self.chunks.lock().unwrap().push((offset, data.len(), command));
        let mut sessions = self.sessions.lock().unwrap();
        let (name, received) = sessions
            .get_mut(session_url)
            .ok_or_else(|| BackendError::http(404, "unknown session"))?;
        assert_eq!(received.len() as u64, offset, "chunks must arrive contiguously");
        received.extend_from_slice(data);

        match command {
            UploadCommand::Continue => Ok(TransportReply {
                status: 308,
                ..TransportReply::default()
            }),
            UploadCommand::Finalize => {
                let uri = format!("stub://files/{name}");
                self.files.lock().unwrap().insert(uri.clone(), received.clone());
                Ok(TransportReply {
                    status: 200,
                    upload_status: Some("final".into()),
                    body: format!(r#"{{"file":{{"uri":"{uri}"}}}}"#),
                    ..TransportReply::default()
                })
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for StubService {
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationReply, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), request.clone()));
        if let Some(reply) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        let text = match request.content.first() {
            Some(ContentPart::FileUri { uri, .. }) => self
                .files
                .lock()
                .unwrap()
                .get(uri)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default(),
            Some(ContentPart::Inline { data, .. }) => String::from_utf8_lossy(data).into_owned(),
            None => request.prompt.clone(),
        };
        Ok(GenerationReply::with_text(text))
    }
}

// ── Test helpers ─────────────────────────────────────────────────────────────

fn config_for(service: &Arc<StubService>) -> edgequake_transcribe::TranscriptionConfigBuilder {
    TranscriptionConfig::builder()
        .backend(service.clone())
        .transport(service.clone())
        .model("primary")
        .fallback_models(["secondary"])
        .retry_base_delay_ms(1)
        .unit_pacing_ms(0)
        .suggest_title(false)
}

fn write_inputs(dir: &Path, texts: &[&str]) -> Vec<String> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let path: PathBuf = dir.join(format!("page{}.txt", i + 1));
            std::fs::write(&path, text).unwrap();
            path.to_string_lossy().into_owned()
        })
        .collect()
}

// ── Ordering and accumulation ────────────────────────────────────────────────

#[tokio::test]
async fn test_units_are_joined_in_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), &["first page", "second page", "third page"]);
    let service = StubService::new();
    let config = config_for(&service)
        .separator(TextSeparator::HorizontalRule)
        .build()
        .unwrap();

    let output = transcribe(&inputs, &config).await.unwrap();

    assert_eq!(output.text, "first page\n\n---\n\nsecond page\n\n---\n\nthird page");
    assert_eq!(output.units.len(), 3);
    let indices: Vec<_> = output.units.iter().map(|u| u.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(output.model_used.as_deref(), Some("primary"));
    assert!(!output.used_fallback);
    assert_eq!(output.stats.completed_units, 3);
    assert_eq!(service.models_called(), vec!["primary"; 3]);
}

#[tokio::test]
async fn test_large_unit_is_uploaded_in_contiguous_chunks() {
    let chunk = 256 * 1024;
    let body = "x".repeat(chunk * 2 + 100);
    let service = StubService::new();
    let config = config_for(&service)
        .chunk_mode(ChunkMode::Custom(chunk))
        .build()
        .unwrap();

    let output = transcribe_bytes("scan.txt", body.clone().into_bytes(), &config)
        .await
        .unwrap();

    assert_eq!(output.text.len(), body.len());
    let log = service.chunk_log();
    let offsets: Vec<_> = log.iter().map(|(o, _, _)| *o).collect();
    assert_eq!(offsets, vec![0, chunk as u64, 2 * chunk as u64]);
    assert_eq!(log[2].1, 100);
    assert_eq!(log[0].2, UploadCommand::Continue);
    assert_eq!(log[2].2, UploadCommand::Finalize);
    assert_eq!(output.stats.uploaded_bytes, body.len() as u64);
}

#[tokio::test]
async fn test_small_unit_goes_inline_when_limit_allows() {
    let service = StubService::new();
    let config = config_for(&service).inline_limit_bytes(1024).build().unwrap();

    let output = transcribe_bytes("note.txt", b"short note".to_vec(), &config)
        .await
        .unwrap();

    assert_eq!(output.text, "short note");
    assert!(service.chunk_log().is_empty());
    assert_eq!(output.units[0].uploaded_bytes, 0);
}

// ── Recovery ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_policy_block_escalates_to_restoration_prompt() {
    let service = StubService::new();
    service.queue("primary", Ok(GenerationReply::blocked("RECITATION")));
    let config = config_for(&service).build().unwrap();

    let output = transcribe_bytes("psalter.txt", b"In principio".to_vec(), &config)
        .await
        .unwrap();

    assert_eq!(output.text, "In principio");
    let prompts = service.prompts_sent();
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], PromptVariant::Standard.prompt());
    assert_eq!(prompts[1], PromptVariant::Restoration.prompt());
    assert_eq!(output.stats.escalations, 1);
    assert!(!output.used_fallback);
}

#[tokio::test]
async fn test_overloaded_primary_falls_back_to_next_model() {
    let service = StubService::new();
    for _ in 0..3 {
        service.queue("primary", Err(BackendError::http(503, "The model is overloaded")));
    }
    let config = config_for(&service).max_attempts(3).build().unwrap();

    let output = transcribe_bytes("deed.txt", b"Know all men".to_vec(), &config)
        .await
        .unwrap();

    assert_eq!(output.text, "Know all men");
    assert_eq!(
        service.models_called(),
        vec!["primary", "primary", "primary", "secondary"]
    );
    assert!(output.used_fallback);
    assert_eq!(output.model_used.as_deref(), Some("secondary"));
    assert_eq!(output.stats.fallback_units, 1);
}

#[tokio::test]
async fn test_fatal_error_does_not_retry() {
    let service = StubService::new();
    service.queue("primary", Err(BackendError::http(400, "API key not valid")));
    let config = config_for(&service).build().unwrap();

    let err = transcribe_bytes("a.txt", b"text".to_vec(), &config)
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(service.models_called(), vec!["primary"]);
}

#[tokio::test]
async fn test_failure_keeps_partial_text() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), &["kept one", "kept two", "lost"]);
    let service = StubService::new();
    service.queue("primary", Ok(GenerationReply::with_text("kept one")));
    service.queue("primary", Ok(GenerationReply::with_text("kept two")));
    service.queue("primary", Err(BackendError::http(404, "models/primary is not found")));
    let config = config_for(&service).build().unwrap();

    let err = transcribe(&inputs, &config).await.unwrap_err();

    match &err {
        TranscribeError::JobAborted {
            unit,
            completed,
            total,
            ..
        } => {
            assert_eq!((*unit, *completed, *total), (3, 2, 3));
        }
        other => panic!("expected JobAborted, got {other:?}"),
    }
    assert_eq!(err.partial_text(), Some("kept one\n\nkept two"));
}

// ── Inputs and output ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_missing_input_fails_before_any_request() {
    let service = StubService::new();
    let config = config_for(&service).build().unwrap();

    let err = transcribe(&["/definitely/not/here.pdf"], &config)
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::InputValidation);
    assert!(service.models_called().is_empty());
}

#[tokio::test]
async fn test_empty_input_list_is_rejected() {
    let service = StubService::new();
    let config = config_for(&service).build().unwrap();
    let err = transcribe::<&str>(&[], &config).await.unwrap_err();
    assert!(matches!(err, TranscribeError::NoInputs));
}

#[tokio::test]
async fn test_transcribe_to_file_writes_text() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), &["alpha", "beta"]);
    let target = dir.path().join("out/letters.txt");
    let service = StubService::new();
    let config = config_for(&service).build().unwrap();

    let output = transcribe_to_file(&inputs, &target, &config).await.unwrap();

    let written = std::fs::read_to_string(&target).unwrap();
    assert_eq!(written, output.text);
    assert!(!dir.path().join("out/letters.txt.tmp").exists());
}

#[tokio::test]
async fn test_title_is_suggested_from_text() {
    let service = StubService::new();
    service.queue("title-model", Ok(GenerationReply::with_text("Letters: From Home!")));
    let config = config_for(&service)
        .suggest_title(true)
        .title_model("title-model")
        .build()
        .unwrap();

    let output = transcribe_bytes("scan.txt", b"Dear mother".to_vec(), &config)
        .await
        .unwrap();

    assert_eq!(output.suggested_name.as_deref(), Some("Letters_From_Home"));
}

#[tokio::test]
async fn test_plan_needs_no_service_calls() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), &["one", "two"]);
    let config = TranscriptionConfig::builder().build().unwrap();

    let units = plan(&inputs, &config).await.unwrap();

    assert_eq!(units.len(), 2);
    assert_eq!(units[0].index, 1);
    assert_eq!(units[1].bytes, 3);
    assert_eq!(units[0].chunks, 1);
    assert_eq!(units[0].pages, None);
}

// ── Streaming and callbacks ──────────────────────────────────────────────────

#[tokio::test]
async fn test_stream_yields_units_then_ends() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), &["one", "two", "three"]);
    let service = StubService::new();
    let config = config_for(&service).build().unwrap();

    let mut stream = transcribe_stream(&inputs, &config).await.unwrap();
    let mut texts = Vec::new();
    while let Some(item) = stream.next().await {
        texts.push(item.unwrap().text);
    }

    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[derive(Default)]
struct Recorder {
    updates: Mutex<Vec<String>>,
    done: Mutex<Option<(usize, usize)>>,
}

impl JobProgressCallback for Recorder {
    fn on_text_updated(&self, accumulated: &str) {
        self.updates.lock().unwrap().push(accumulated.to_string());
    }

    fn on_job_complete(&self, total_units: usize, success_count: usize) {
        *self.done.lock().unwrap() = Some((total_units, success_count));
    }
}

#[tokio::test]
async fn test_accumulated_text_is_reported_after_each_unit() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), &["a", "b"]);
    let service = StubService::new();
    let recorder = Arc::new(Recorder::default());
    let config = config_for(&service)
        .progress_callback(recorder.clone())
        .build()
        .unwrap();

    transcribe(&inputs, &config).await.unwrap();

    assert_eq!(*recorder.updates.lock().unwrap(), vec!["a", "a\n\nb"]);
    assert_eq!(*recorder.done.lock().unwrap(), Some((2, 2)));
}

#[tokio::test]
async fn test_callback_send_in_tokio_spawn() {
    let service = StubService::new();
    let config = config_for(&service)
        .progress_callback(Arc::new(Recorder::default()))
        .build()
        .unwrap();

    let handle = tokio::spawn(async move {
        transcribe_bytes("spawned.txt", b"moved".to_vec(), &config).await
    });
    let output = tokio_test::assert_ok!(handle.await.unwrap());
    assert_eq!(output.text, "moved");
}

#[test]
fn test_sync_entry_point_builds_its_own_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_inputs(dir.path(), &["sync"]);
    let service = StubService::new();
    let config = config_for(&service).build().unwrap();

    let output = transcribe_sync(&inputs, &config).unwrap();
    assert_eq!(output.text, "sync");
}

// ── Live API ─────────────────────────────────────────────────────────────────

/// Skip unless E2E_ENABLED and GEMINI_API_KEY are both set.
macro_rules! live_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run live tests");
            return;
        }
        if std::env::var("GEMINI_API_KEY").is_err() {
            println!("SKIP: GEMINI_API_KEY is not set");
            return;
        }
    }};
}

#[tokio::test]
async fn live_transcribes_plain_text_document() {
    live_skip_unless_ready!();

    let config = TranscriptionConfig::builder()
        .suggest_title(false)
        .api_timeout_secs(120)
        .build()
        .unwrap();
    let output = tokio::time::timeout(
        Duration::from_secs(300),
        transcribe_bytes(
            "hello.txt",
            b"The quick brown fox jumps over the lazy dog.".to_vec(),
            &config,
        ),
    )
    .await
    .expect("live request timed out")
    .unwrap();

    println!("model: {:?}\n{}", output.model_used, output.text);
    assert!(output.text.to_lowercase().contains("quick brown fox"));
}

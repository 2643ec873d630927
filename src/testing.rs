//! In-memory stand-in for the upload and generation services, for unit tests.
//!
//! Uploads are stored under `mem://files/<display name>`. Generation replies
//! come from a per-model script when one is queued and otherwise echo the
//! attached content as text, so job output is a deterministic function of
//! the inputs.

use crate::backend::{
    BackendError, ContentPart, GenerationBackend, GenerationReply, GenerationRequest,
    SessionRequest, TransportReply, UploadCommand, UploadTransport,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChunkRecord {
    pub offset: u64,
    pub len: usize,
    pub command: UploadCommand,
}

struct OpenSession {
    name: String,
    received: Vec<u8>,
}

#[derive(Default)]
pub(crate) struct MemoryService {
    incomplete_status: u16,
    session_reply: Option<TransportReply>,
    chunk_replies: Mutex<VecDeque<TransportReply>>,
    sessions: Mutex<HashMap<String, OpenSession>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    chunks: Mutex<Vec<ChunkRecord>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<GenerationReply, BackendError>>>>,
    requests: Mutex<Vec<(String, GenerationRequest)>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self {
            incomplete_status: 200,
            ..Self::default()
        }
    }

    /// Status used for accepted non-final chunks (200 or 308).
    pub fn with_incomplete_status(mut self, status: u16) -> Self {
        self.incomplete_status = status;
        self
    }

    /// Answer every negotiation with `reply`.
    pub fn with_session_reply(mut self, reply: TransportReply) -> Self {
        self.session_reply = Some(reply);
        self
    }

    /// Answer the next chunk with `reply` instead of the normal behaviour.
    pub fn with_chunk_reply(self, reply: TransportReply) -> Self {
        self.chunk_replies.lock().unwrap().push_back(reply);
        self
    }

    /// Queue a scripted reply for `model`.
    pub fn script(&self, model: &str, reply: Result<GenerationReply, BackendError>) -> &Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue `n` copies of a transient failure for `model`.
    pub fn overloaded(&self, model: &str, n: usize) -> &Self {
        for _ in 0..n {
            self.script(model, Err(BackendError::http(503, "The model is overloaded")));
        }
        self
    }

    pub fn chunk_log(&self) -> Vec<ChunkRecord> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn stored(&self, uri: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(uri).cloned()
    }

    /// Every generation request so far, as `(model, request)`.
    pub fn requests(&self) -> Vec<(String, GenerationRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn models_called(&self) -> Vec<String> {
        self.requests().into_iter().map(|(m, _)| m).collect()
    }

    fn echo(&self, request: &GenerationRequest) -> String {
        match request.content.first() {
            Some(ContentPart::FileUri { uri, .. }) => self
                .stored(uri)
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_else(|| format!("missing file {uri}")),
            Some(ContentPart::Inline { data, .. }) => String::from_utf8_lossy(data).into_owned(),
            None => request.prompt.clone(),
        }
    }
}

#[async_trait]
impl UploadTransport for MemoryService {
    fn endpoint(&self) -> String {
        "mem://upload".to_string()
    }

    async fn start_session(&self, request: &SessionRequest) -> Result<TransportReply, BackendError> {
        if let Some(reply) = &self.session_reply {
            return Ok(reply.clone());
        }
        let mut sessions = self.sessions.lock().unwrap();
        let url = format!("mem://session/{}", sessions.len() + 1);
        sessions.insert(
            url.clone(),
            OpenSession {
                name: request.display_name.clone(),
                received: Vec::with_capacity(request.total_size as usize),
            },
        );
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
        self.chunks.lock().unwrap().push(ChunkRecord {
            offset,
            len: data.len(),
            command,
        });
        if let Some(reply) = self.chunk_replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }

        let mut sessions = self.sessions.lock().unwrap();
        let Some(session) = sessions.get_mut(session_url) else {
            return Ok(TransportReply {
                status: 404,
                body: "unknown session".into(),
                ..TransportReply::default()
            });
        };
        if session.received.len() as u64 != offset {
            return Ok(TransportReply {
                status: 400,
                body: format!("expected offset {}", session.received.len()),
                ..TransportReply::default()
            });
        }
        session.received.extend_from_slice(data);

        match command {
            UploadCommand::Continue => Ok(TransportReply {
                status: self.incomplete_status,
                upload_status: Some("active".into()),
                ..TransportReply::default()
            }),
            UploadCommand::Finalize => {
                let uri = format!("mem://files/{}", session.name);
                self.files
                    .lock()
                    .unwrap()
                    .insert(uri.clone(), session.received.clone());
                Ok(TransportReply {
                    status: 200,
                    upload_status: Some("final".into()),
                    body: format!(r#"{{"file":{{"uri":"{uri}","state":"ACTIVE"}}}}"#),
                    ..TransportReply::default()
                })
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for MemoryService {
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationReply, BackendError> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), request.clone()));
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(reply) => reply,
            None => Ok(GenerationReply::with_text(self.echo(request))),
        }
    }
}

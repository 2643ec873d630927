//! Resumable upload client.
//!
//! The upload service speaks a two-phase protocol:
//!
//! ```text
//!  negotiate ──▶ session URL
//!  chunk @0        "upload"            ──▶ incomplete
//!  chunk @C        "upload"            ──▶ incomplete
//!  chunk @2C       "upload, finalize"  ──▶ 200 { "file": { "uri": … } }
//! ```
//!
//! ## Why a state machine?
//!
//! Each chunk's acceptance gates the next one, and the service rejects any
//! chunk whose offset is not exactly the number of bytes received so far.
//! [`ResumableUpload`] makes that explicit: it is `Negotiating`, then
//! `Transferring { offset }`, then `Finalized` or `Failed`, and each
//! transition is driven by one reply. [`ResumableUpload::send_next_chunk`]
//! takes `&mut self`, so a session cannot have two writers. Because the
//! offset is part of the state, continuing an interrupted session is a matter
//! of rebuilding the machine with [`ResumableUpload::resume`].
//!
//! ## Handles
//!
//! A [`ResourceHandle`] can only be built inside this module, from a
//! finalization reply. Code holding a handle therefore holds proof that the
//! upload completed.
//!
//! ## Reply interpretation
//!
//! | Chunk | Reply | Result |
//! |-------|-------|--------|
//! | any | transport error | `Transport` |
//! | non-final | 3xx, or 2xx without a file payload | continue |
//! | non-final | 2xx with a file payload | `PrematureFinalization` |
//! | final | 2xx with `file.uri` | finalized |
//! | final | 2xx without `file.uri` | `MissingFileUri` |
//! | final | 3xx or 2xx `active` | `NotFinalized` |
//! | any | other | `ChunkRejected` |
//!
//! None of these are retried. A failed session is discarded.

use crate::backend::{SessionRequest, TransportReply, UploadCommand, UploadTransport};
use crate::error::UploadError;
use crate::pipeline::input::UploadUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One byte range of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTransferState {
    pub offset: u64,
    pub size: u64,
    pub is_final: bool,
}

impl ChunkTransferState {
    /// The chunk starting at `offset` of a `total`-byte payload.
    pub fn at(offset: u64, total: u64, chunk_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let is_final = offset.saturating_add(chunk_size) >= total;
        let size = chunk_size.min(total.saturating_sub(offset));
        Self {
            offset,
            size,
            is_final,
        }
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn command(&self) -> UploadCommand {
        if self.is_final {
            UploadCommand::Finalize
        } else {
            UploadCommand::Continue
        }
    }
}

/// All chunks of a `total`-byte payload, in order.
///
/// Offsets are `0, C, 2C, …`; only the last chunk is final and it ends at
/// exactly `total`. A zero-byte payload is a single empty final chunk.
pub fn plan_chunks(total: u64, chunk_size: u64) -> Vec<ChunkTransferState> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    loop {
        let chunk = ChunkTransferState::at(offset, total, chunk_size);
        chunks.push(chunk);
        if chunk.is_final {
            return chunks;
        }
        offset = chunk.end();
    }
}

/// A negotiated upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Negotiation endpoint the session was opened against.
    pub endpoint: String,
    /// URL every chunk is sent to.
    pub session_url: String,
    pub total_size: u64,
    pub media_type: String,
}

/// Reference to a finalized upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceHandle {
    uri: String,
}

impl ResourceHandle {
    fn from_finalization(uri: String) -> Self {
        Self { uri }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[cfg(test)]
    pub(crate) fn for_tests(uri: &str) -> Self {
        Self::from_finalization(uri.to_string())
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// Where an upload stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadState {
    Negotiating,
    Transferring { offset: u64 },
    Finalized,
    Failed,
}

/// Result of one successful chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Accepted; more chunks follow. Carries the new offset.
    Continue { sent: u64 },
    /// The upload is complete.
    Finalized(ResourceHandle),
}

#[derive(Deserialize)]
struct FinalizeBody {
    file: Option<FinalizedFile>,
}

#[derive(Deserialize)]
struct FinalizedFile {
    uri: Option<String>,
}

/// Upload state machine for one unit.
pub struct ResumableUpload<'a> {
    transport: &'a dyn UploadTransport,
    display_name: String,
    media_type: String,
    data: Arc<[u8]>,
    chunk_size: u64,
    state: UploadState,
    session: Option<UploadSession>,
}

impl<'a> ResumableUpload<'a> {
    pub fn new(transport: &'a dyn UploadTransport, unit: &UploadUnit, chunk_size: usize) -> Self {
        Self {
            transport,
            display_name: unit.name().to_string(),
            media_type: unit.media_type().to_string(),
            data: unit.shared_data(),
            chunk_size: chunk_size.max(1) as u64,
            state: UploadState::Negotiating,
            session: None,
        }
    }

    /// Continue an existing session from `offset`.
    ///
    /// The session must describe `unit` (same size and media type) and
    /// `offset` must lie within it.
    pub fn resume(
        transport: &'a dyn UploadTransport,
        unit: &UploadUnit,
        chunk_size: usize,
        session: UploadSession,
        offset: u64,
    ) -> Result<Self, UploadError> {
        let mut upload = Self::new(transport, unit, chunk_size);
        let total = upload.total_size();
        if session.total_size != total || session.media_type != upload.media_type {
            return Err(UploadError::InvalidState {
                state: format!(
                    "session for {} bytes of {} resumed with {} bytes of {}",
                    session.total_size, session.media_type, total, upload.media_type
                ),
            });
        }
        if offset > total {
            return Err(UploadError::InvalidState {
                state: format!("resume offset {} past end of {} bytes", offset, total),
            });
        }
        upload.state = UploadState::Transferring { offset };
        upload.session = Some(session);
        Ok(upload)
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    pub fn total_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The chunk the next call to [`send_next_chunk`](Self::send_next_chunk)
    /// will send, if the upload is transferring.
    pub fn next_chunk(&self) -> Option<ChunkTransferState> {
        match self.state {
            UploadState::Transferring { offset } => Some(ChunkTransferState::at(
                offset,
                self.total_size(),
                self.chunk_size,
            )),
            _ => None,
        }
    }

    /// Open the session. Moves `Negotiating` → `Transferring { offset: 0 }`.
    pub async fn negotiate(&mut self) -> Result<&UploadSession, UploadError> {
        if self.state != UploadState::Negotiating {
            return Err(self.invalid_state());
        }

        let request = SessionRequest {
            display_name: self.display_name.clone(),
            media_type: self.media_type.clone(),
            total_size: self.total_size(),
        };
        let reply = self
            .transport
            .start_session(&request)
            .await
            .map_err(|e| self.fail(UploadError::Transport(e.to_string())))?;

        if !reply.is_success() {
            return Err(self.fail(UploadError::SessionRejected {
                status: reply.status,
                body: reply.body,
            }));
        }
        let session_url = match reply.upload_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => return Err(self.fail(UploadError::MissingSessionUrl)),
        };

        debug!(
            "Upload session opened for '{}' ({} bytes, {})",
            self.display_name,
            self.total_size(),
            self.media_type
        );
        let session = UploadSession {
            endpoint: self.transport.endpoint(),
            session_url,
            total_size: self.total_size(),
            media_type: self.media_type.clone(),
        };
        self.state = UploadState::Transferring { offset: 0 };
        Ok(self.session.insert(session))
    }

    /// Send the chunk at the current offset and apply the reply.
    pub async fn send_next_chunk(&mut self) -> Result<ChunkOutcome, UploadError> {
        let (chunk, session_url) = match (self.next_chunk(), self.session.as_ref()) {
            (Some(chunk), Some(session)) => (chunk, session.session_url.clone()),
            _ => return Err(self.invalid_state()),
        };

        let data = Arc::clone(&self.data);
        let start = chunk.offset as usize;
        let Some(bytes) = data.get(start..start.saturating_add(chunk.size as usize)) else {
            return Err(self.fail(UploadError::InvalidState {
                state: format!("chunk {}+{} outside {} bytes", chunk.offset, chunk.size, data.len()),
            }));
        };
        debug!(
            offset = chunk.offset,
            size = chunk.size,
            command = chunk.command().header_value(),
            "Sending chunk of '{}'",
            self.display_name
        );

        let reply = self
            .transport
            .put_chunk(&session_url, chunk.offset, chunk.command(), bytes)
            .await
            .map_err(|e| self.fail(UploadError::Transport(e.to_string())))?;

        match interpret_chunk_reply(&chunk, reply) {
            Ok(ChunkOutcome::Continue { sent }) => {
                self.state = UploadState::Transferring { offset: sent };
                Ok(ChunkOutcome::Continue { sent })
            }
            Ok(ChunkOutcome::Finalized(handle)) => {
                self.state = UploadState::Finalized;
                Ok(ChunkOutcome::Finalized(handle))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: UploadError) -> UploadError {
        self.state = UploadState::Failed;
        error
    }

    fn invalid_state(&self) -> UploadError {
        UploadError::InvalidState {
            state: format!("{:?}", self.state),
        }
    }
}

/// Decide what a chunk reply means. See the module docs for the table.
fn interpret_chunk_reply(
    chunk: &ChunkTransferState,
    reply: TransportReply,
) -> Result<ChunkOutcome, UploadError> {
    if reply.is_incomplete() {
        return if chunk.is_final {
            Err(UploadError::NotFinalized {
                offset: chunk.offset,
                status: reply.status,
            })
        } else {
            Ok(ChunkOutcome::Continue { sent: chunk.end() })
        };
    }

    if !reply.is_success() {
        return Err(UploadError::ChunkRejected {
            offset: chunk.offset,
            status: reply.status,
            body: reply.body,
        });
    }

    let file = serde_json::from_str::<FinalizeBody>(&reply.body)
        .ok()
        .and_then(|b| b.file);
    let reported_final = reply
        .upload_status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("final"));
    let reported_active = reply
        .upload_status
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("active"));

    if !chunk.is_final {
        return if file.is_some() || reported_final {
            Err(UploadError::PrematureFinalization {
                offset: chunk.offset,
            })
        } else {
            Ok(ChunkOutcome::Continue { sent: chunk.end() })
        };
    }

    if file.is_none() && reported_active {
        return Err(UploadError::NotFinalized {
            offset: chunk.offset,
            status: reply.status,
        });
    }

    match file.and_then(|f| f.uri).filter(|u| !u.is_empty()) {
        Some(uri) => Ok(ChunkOutcome::Finalized(ResourceHandle::from_finalization(uri))),
        None => Err(UploadError::MissingFileUri { body: reply.body }),
    }
}

/// Upload `unit` and return its handle.
///
/// Cancellation is checked before every chunk. `on_progress(sent, total)`
/// fires after each accepted chunk.
pub async fn upload_unit(
    transport: &dyn UploadTransport,
    unit: &UploadUnit,
    chunk_size: usize,
    cancel: Option<&CancellationToken>,
    mut on_progress: impl FnMut(u64, u64),
) -> Result<ResourceHandle, UploadError> {
    let mut upload = ResumableUpload::new(transport, unit, chunk_size);
    let total = upload.total_size();
    let chunk_count = plan_chunks(total, chunk_size as u64).len();

    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return Err(UploadError::Cancelled { sent: 0, total });
    }
    upload.negotiate().await?;
    info!(
        "Uploading '{}': {} bytes in {} chunk(s)",
        unit.name(),
        total,
        chunk_count
    );

    let mut sent = 0;
    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(UploadError::Cancelled { sent, total });
        }
        match upload.send_next_chunk().await? {
            ChunkOutcome::Continue { sent: now } => {
                sent = now;
                on_progress(sent, total);
            }
            ChunkOutcome::Finalized(handle) => {
                on_progress(total, total);
                debug!("Upload of '{}' finalized: {}", unit.name(), handle);
                return Ok(handle);
            }
        }
    }
}

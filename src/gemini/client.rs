//! reqwest client for the Generative Language API.

use super::types::{ApiErrorResponse, GenerateContentRequest, GenerateContentResponse};
use crate::backend::{
    BackendError, GenerationBackend, GenerationReply, GenerationRequest, SessionRequest,
    TransportReply, UploadCommand, UploadTransport,
};
use crate::config::TranscriptionConfig;
use crate::error::TranscribeError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Base URL of the REST API.
pub const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Resumable upload negotiation endpoint.
pub const UPLOAD_URL: &str = "https://generativelanguage.googleapis.com/upload/v1beta/files";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Talks to the Generative Language API. Implements both
/// [`GenerationBackend`] and [`UploadTransport`].
///
/// The key travels in the `x-goog-api-key` header rather than the query
/// string, so request URLs (which reqwest puts in its error messages) never
/// contain it.
#[derive(Clone)]
pub struct GeminiClient {
    api: reqwest::Client,
    upload: reqwest::Client,
    api_key: String,
    api_base: String,
    upload_url: String,
}

impl fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiClient")
            .field("api_base", &self.api_base)
            .field("upload_url", &self.upload_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiClient {
    /// Client using the timeouts in `config`.
    pub fn new(api_key: impl Into<String>, config: &TranscriptionConfig) -> Result<Self, TranscribeError> {
        Ok(Self {
            api: http_client(config.api_timeout_secs)?,
            upload: http_client(config.upload_timeout_secs)?,
            api_key: api_key.into(),
            api_base: API_BASE_URL.to_string(),
            upload_url: UPLOAD_URL.to_string(),
        })
    }

    /// Point the client at another deployment (a proxy, a local fake).
    pub fn with_base_urls(mut self, api_base: impl Into<String>, upload_url: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.upload_url = upload_url.into();
        self
    }

    fn generate_url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:generateContent", self.api_base, model)
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, TranscribeError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        // 308 is upload protocol state, never a redirect to follow.
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| TranscribeError::Internal(format!("failed to build HTTP client: {e}")))
}

/// Map a reqwest failure to a message the classifier recognises.
fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::message(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        BackendError::message(format!("Network connection failed: {e}"))
    } else {
        BackendError::message(format!("Network error: {e}"))
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn transport_reply(resp: reqwest::Response) -> Result<TransportReply, BackendError> {
    let status = resp.status().as_u16();
    let upload_url = header_string(resp.headers(), "x-goog-upload-url");
    let upload_status = header_string(resp.headers(), "x-goog-upload-status");
    let body = resp.text().await.map_err(transport_error)?;
    Ok(TransportReply {
        status,
        upload_url,
        upload_status,
        body,
    })
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationReply, BackendError> {
        let body = GenerateContentRequest::from(request);
        debug!("POST generateContent model={} parts={}", model, request.content.len() + 1);

        let resp = self
            .api
            .post(self.generate_url(model))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        let text = resp.text().await.map_err(transport_error)?;
        if !status.is_success() {
            return Err(BackendError::http(
                status.as_u16(),
                ApiErrorResponse::message_from_body(&text),
            ));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::message(format!("Malformed response: {e}")))?;
        Ok(parsed.into())
    }
}

#[async_trait]
impl UploadTransport for GeminiClient {
    fn endpoint(&self) -> String {
        self.upload_url.clone()
    }

    async fn start_session(&self, request: &SessionRequest) -> Result<TransportReply, BackendError> {
        debug!(
            "Negotiating upload of '{}' ({} bytes, {})",
            request.display_name, request.total_size, request.media_type
        );
        let resp = self
            .upload
            .post(&self.upload_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", request.total_size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", &request.media_type)
            .json(&serde_json::json!({ "file": { "display_name": request.display_name } }))
            .send()
            .await
            .map_err(transport_error)?;
        transport_reply(resp).await
    }

    async fn put_chunk(
        &self,
        session_url: &str,
        offset: u64,
        command: UploadCommand,
        data: &[u8],
    ) -> Result<TransportReply, BackendError> {
        debug!("Chunk at offset {} ({} bytes, {})", offset, data.len(), command.header_value());
        // Content-Length is derived from the body.
        let resp = self
            .upload
            .post(session_url)
            .header("X-Goog-Upload-Offset", offset.to_string())
            .header("X-Goog-Upload-Command", command.header_value())
            .body(data.to_vec())
            .send()
            .await
            .map_err(transport_error)?;
        transport_reply(resp).await
    }
}

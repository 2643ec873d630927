//! Input resolution: turn a user-supplied path or URL into an [`UploadUnit`].
//!
//! ## Why read everything into memory?
//!
//! Every later stage needs random access to the bytes: the splitter parses
//! the PDF structure, and the upload client slices fixed-size byte ranges at
//! arbitrary offsets. Holding the payload in an `Arc<[u8]>` lets split parts
//! and upload chunks share it without copies or temp files.
//!
//! ## Media type detection
//!
//! 1. Declared type (HTTP `Content-Type`, or a caller-supplied hint), unless
//!    it is the generic `application/octet-stream`
//! 2. File extension via `mime_guess`
//! 3. Magic bytes (`%PDF`, PNG, JPEG, GIF, WEBP)
//! 4. `application/pdf`

use crate::error::TranscribeError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Fallback when nothing else identifies the content.
pub const DEFAULT_MEDIA_TYPE: &str = "application/pdf";

const OCTET_STREAM: &str = "application/octet-stream";

/// One transcribable blob: a whole input, or one part of a split document.
///
/// Immutable once created. Clones share the payload.
#[derive(Clone)]
pub struct UploadUnit {
    name: String,
    source: String,
    part: Option<usize>,
    media_type: String,
    data: Arc<[u8]>,
}

impl UploadUnit {
    /// Create a unit whose source is its own name.
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            name,
            part: None,
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Create a unit from raw bytes, detecting the media type from `name`
    /// and the content.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let name = name.into();
        let data: Arc<[u8]> = data.into();
        let media_type = detect_media_type(None, &name, &data);
        Self::new(name, media_type, data)
    }

    /// Set the originating input (path or URL).
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// A part of this unit produced by the splitter.
    pub(crate) fn derive_part(&self, part: usize, name: String, data: Vec<u8>) -> Self {
        Self {
            name,
            source: self.source.clone(),
            part: Some(part),
            media_type: self.media_type.clone(),
            data: data.into(),
        }
    }

    /// Display name, also sent as the upload's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The input this unit came from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 1-based part number when produced by the splitter.
    pub fn part(&self) -> Option<usize> {
        self.part
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the payload.
    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_pdf(&self) -> bool {
        self.media_type == "application/pdf"
    }
}

impl fmt::Debug for UploadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadUnit")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("part", &self.part)
            .field("media_type", &self.media_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to an [`UploadUnit`].
///
/// URLs are downloaded with `timeout_secs`; anything else is read as a local
/// file. Empty payloads are rejected with [`TranscribeError::EmptyInput`].
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<UploadUnit, TranscribeError> {
    let unit = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else if input.trim().is_empty() {
        return Err(TranscribeError::InvalidInput {
            input: input.to_string(),
        });
    } else {
        read_local(input).await?
    };

    if unit.is_empty() {
        return Err(TranscribeError::EmptyInput {
            name: unit.name().to_string(),
        });
    }
    Ok(unit)
}

/// Read a local file, mapping I/O errors to input errors.
async fn read_local(path_str: &str) -> Result<UploadUnit, TranscribeError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(TranscribeError::PermissionDenied { path });
        }
        Err(_) => return Err(TranscribeError::FileNotFound { path }),
    };

    let name = file_name(&path);
    let media_type = detect_media_type(None, &name, &bytes);
    debug!(
        "Resolved local input: {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        media_type
    );
    Ok(UploadUnit::new(name, media_type, bytes).with_source(path_str))
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<UploadUnit, TranscribeError> {
    info!("Downloading input from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| TranscribeError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TranscribeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            TranscribeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(TranscribeError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let declared = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());

    let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            TranscribeError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            TranscribeError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    let name = extract_filename(url);
    let media_type = detect_media_type(declared.as_deref(), &name, &bytes);
    info!("Downloaded {} bytes ({})", bytes.len(), media_type);

    Ok(UploadUnit::new(name, media_type, bytes.to_vec()).with_source(url))
}

/// Extract a reasonable filename from the URL path.
pub fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Pick the media type for a payload. See the module docs for the order.
pub fn detect_media_type(declared: Option<&str>, name: &str, data: &[u8]) -> String {
    if let Some(d) = declared.map(str::trim).filter(|d| !d.is_empty() && *d != OCTET_STREAM) {
        return d.to_string();
    }
    if let Some(guess) = mime_guess::from_path(name).first_raw() {
        if guess != OCTET_STREAM {
            return guess.to_string();
        }
    }
    sniff_media_type(data)
        .unwrap_or(DEFAULT_MEDIA_TYPE)
        .to_string()
}

/// Identify common document and image formats by their leading bytes.
pub fn sniff_media_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

//! Filename suggestion for a finished transcript.
//!
//! Non-critical: any failure, refusal or empty answer yields
//! [`DEFAULT_TITLE`], and the job result never depends on it.

use crate::backend::{GenerationBackend, GenerationRequest};
use crate::prompts::title_prompt;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Name used when no suggestion is available.
pub const DEFAULT_TITLE: &str = "transcription";

/// Upper bound on the sanitised name, in characters.
const MAX_TITLE_CHARS: usize = 80;

static RE_UNSAFE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_\x{00C0}-\x{00FF} ]").unwrap());

static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Ask `model` for a short name for `text` and make it filesystem-safe.
pub async fn suggest_title(backend: &dyn GenerationBackend, model: &str, text: &str) -> String {
    if text.trim().is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    let request = GenerationRequest::text(title_prompt(text));
    let raw = match backend.generate(model, &request).await {
        Ok(reply) => match reply.into_text() {
            Ok(t) => t,
            Err(e) => {
                warn!("Title suggestion refused: {}", e);
                return DEFAULT_TITLE.to_string();
            }
        },
        Err(e) => {
            warn!("Title suggestion failed: {}", e);
            return DEFAULT_TITLE.to_string();
        }
    };

    let name = sanitize_title(&raw);
    debug!("Suggested title: {:?} → {:?}", raw.trim(), name);
    name
}

/// Keep ASCII alphanumerics, `_`, Latin-1 letters and spaces, then join
/// words with `_`. Falls back to [`DEFAULT_TITLE`] when nothing is left.
pub fn sanitize_title(raw: &str) -> String {
    let kept = RE_UNSAFE.replace_all(raw, "");
    let joined = RE_SPACES.replace_all(kept.trim(), "_");
    let name: String = joined.chars().take(MAX_TITLE_CHARS).collect();
    let name = name.trim_matches('_');
    if name.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        name.to_string()
    }
}

//! Generative Language API implementation of the backend seams.
//!
//! [`GeminiClient`] sends `generateContent` requests and carries the
//! resumable upload protocol. It is built from the API key when the caller
//! does not inject its own backend through
//! [`crate::config::TranscriptionConfig::backend`].

mod client;
pub(crate) mod types;

pub use client::{GeminiClient, API_BASE_URL, UPLOAD_URL};
pub use types::HARM_CATEGORIES;

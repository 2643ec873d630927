//! Pipeline stages for one transcription unit.
//!
//! Each submodule handles one concern and is tested on its own against
//! in-memory services.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ upload ──▶ fallback ──▶ postprocess
//! (path/URL) (lopdf) (resumable)  │  (retry)     (cleanup)
//!                                 └─▶ request ──▶ classify
//!                                     (escalation)
//! ```
//!
//! 1. [`input`]: resolve a path or URL into an [`input::UploadUnit`]
//! 2. [`split`]: cut PDFs over the page limit into ordered parts
//! 3. [`upload`]: negotiate a resumable session and send fixed-size chunks
//! 4. [`request`]: one model, standard prompt, restoration prompt on a block
//! 5. [`classify`]: policy block / transient / fatal from an error message
//! 6. [`retry`]: exponential backoff driven by a [`retry::RetryPolicy`]
//! 7. [`fallback`]: retries per model, then the next model in the chain
//! 8. [`postprocess`]: deterministic cleanup of the model's text

pub mod classify;
pub mod fallback;
pub mod input;
pub mod postprocess;
pub mod request;
pub mod retry;
pub mod split;
pub mod upload;

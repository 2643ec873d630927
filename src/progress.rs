//! Progress-callback trait for job events.
//!
//! Inject an [`Arc<dyn JobProgressCallback>`] via
//! [`crate::config::TranscriptionConfigBuilder::progress_callback`] to follow
//! a job as it uploads and transcribes each unit.
//!
//! # Why callbacks instead of channels?
//!
//! A callback is the least invasive integration point: callers can forward
//! events to a channel, a WebSocket or a terminal progress bar without the
//! library knowing how the host application communicates.
//!
//! Partial results matter here. A long job can fail at unit 7 of 9;
//! [`JobProgressCallback::on_text_updated`] hands the caller the accumulated
//! text after every unit so nothing already transcribed is lost from view.
//!
//! # Example
//!
//! ```rust
//! use edgequake_transcribe::{JobProgressCallback, TranscriptionConfig};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct LatestText(Mutex<String>);
//!
//! impl JobProgressCallback for LatestText {
//!     fn on_text_updated(&self, accumulated: &str) {
//!         *self.0.lock().unwrap() = accumulated.to_string();
//!     }
//! }
//!
//! let config = TranscriptionConfig::builder()
//!     .progress_callback(Arc::new(LatestText::default()))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;
use std::time::Duration;

/// Called by the job sequencer as it processes each unit.
///
/// Units are processed one at a time, so calls never overlap for one job.
/// All methods have default no-op implementations.
pub trait JobProgressCallback: Send + Sync {
    /// Called once after inputs are resolved and split.
    ///
    /// # Arguments
    /// * `total_units` - number of units that will be processed
    fn on_job_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called before a unit's upload begins.
    ///
    /// # Arguments
    /// * `unit_num`    - 1-indexed unit number
    /// * `total_units` - total units in the job
    /// * `name`        - display name of the unit
    fn on_unit_start(&self, unit_num: usize, total_units: usize, name: &str) {
        let _ = (unit_num, total_units, name);
    }

    /// Called after each accepted upload chunk.
    fn on_upload_progress(&self, unit_num: usize, bytes_sent: u64, total_bytes: u64) {
        let _ = (unit_num, bytes_sent, total_bytes);
    }

    /// Free-form status line, e.g. while the job waits between units.
    fn on_status(&self, message: &str) {
        let _ = message;
    }

    /// Called before waiting out a transient failure.
    ///
    /// # Arguments
    /// * `model`   - model that failed
    /// * `attempt` - 1-indexed attempt that just failed
    /// * `delay`   - wait before the next attempt
    /// * `error`   - error description
    fn on_retry(&self, model: &str, attempt: u32, delay: Duration, error: &str) {
        let _ = (model, attempt, delay, error);
    }

    /// Called when a model is abandoned for the next one in the chain.
    fn on_fallback(&self, from_model: &str, to_model: &str, error: &str) {
        let _ = (from_model, to_model, error);
    }

    /// Called when a unit is transcribed.
    ///
    /// # Arguments
    /// * `unit_num`   - 1-indexed unit number
    /// * `total_units` - total units
    /// * `model_used` - model that produced the text
    /// * `text_len`   - byte length of the unit's text
    fn on_unit_complete(&self, unit_num: usize, total_units: usize, model_used: &str, text_len: usize) {
        let _ = (unit_num, total_units, model_used, text_len);
    }

    /// Called with the full accumulated text after each successful unit.
    fn on_text_updated(&self, accumulated: &str) {
        let _ = accumulated;
    }

    /// Called when a unit fails; the job stops after this.
    fn on_unit_error(&self, unit_num: usize, total_units: usize, error: &str) {
        let _ = (unit_num, total_units, error);
    }

    /// Called once when the job ends, successfully or not.
    ///
    /// # Arguments
    /// * `total_units`   - total units in the job
    /// * `success_count` - units transcribed before the job ended
    fn on_job_complete(&self, total_units: usize, success_count: usize) {
        let _ = (total_units, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl JobProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::TranscriptionConfig`].
pub type ProgressCallback = Arc<dyn JobProgressCallback>;

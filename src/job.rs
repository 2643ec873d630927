//! Job sequencer: processes upload units strictly in order.
//!
//! ```text
//!  for unit in units:
//!      pause (not before the first unit)
//!      upload (or inline) → fallback orchestrator → cleanup
//!      append text, notify on_text_updated
//!  any unit error → JobAborted{partial_text}, status Failed
//! ```
//!
//! A [`Job`] owns its [`JobState`]; nothing is shared between units except
//! the accumulated text. [`Job::step`] advances one unit at a time so the
//! stream API can yield each result as soon as it exists, and [`Job::run`]
//! drives it to completion for the eager entry points.

use crate::backend::{GenerationBackend, UploadTransport};
use crate::config::{TextSeparator, TranscriptionConfig};
use crate::error::{TranscribeError, UploadError};
use crate::output::{JobStats, UnitResult};
use crate::pipeline::fallback::{run_with_fallback, FallbackContext, ModelChain};
use crate::pipeline::input::UploadUnit;
use crate::pipeline::postprocess::clean_text;
use crate::pipeline::request::{ContentRef, RequestOptions};
use crate::pipeline::retry::{sleep_or_cancel, RetryPolicy};
use crate::pipeline::upload::upload_unit;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Services and settings a job runs with. Built once per job.
#[derive(Clone)]
pub struct JobContext {
    pub backend: Arc<dyn GenerationBackend>,
    pub transport: Arc<dyn UploadTransport>,
    pub chain: ModelChain,
    pub retry: RetryPolicy,
    pub options: RequestOptions,
    pub chunk_size: usize,
    /// Units up to this size go inline; 0 always uploads.
    pub inline_limit_bytes: usize,
    pub pacing: Duration,
    pub separator: TextSeparator,
    pub clean_output: bool,
    pub progress: Option<ProgressCallback>,
    pub cancel: Option<CancellationToken>,
}

impl JobContext {
    /// Context for `config` with an already-resolved primary model.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        transport: Arc<dyn UploadTransport>,
        primary_model: impl Into<String>,
        config: &TranscriptionConfig,
    ) -> Self {
        Self {
            backend,
            transport,
            chain: ModelChain::new(primary_model, &config.fallback_models),
            retry: config.retry,
            options: RequestOptions::from_config(config),
            chunk_size: config.chunk_mode.chunk_size(),
            inline_limit_bytes: config.inline_limit_bytes,
            pacing: config.unit_pacing(),
            separator: config.separator.clone(),
            clean_output: config.clean_output,
            progress: config.progress_callback.clone(),
            cancel: config.cancel_token.clone(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Everything a job has produced so far.
#[derive(Debug, Clone)]
pub struct JobState {
    units: Vec<UploadUnit>,
    text: String,
    results: Vec<UnitResult>,
    status: JobStatus,
    stats: JobStats,
}

impl JobState {
    pub fn units(&self) -> &[UploadUnit] {
        &self.units
    }

    /// Number of units finished successfully.
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    /// Accumulated text of all finished units.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn results(&self) -> &[UnitResult] {
        &self.results
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn stats(&self) -> &JobStats {
        &self.stats
    }

    /// Model that produced the most recent unit.
    pub fn last_model(&self) -> Option<&str> {
        self.results.last().map(|r| r.model_used.as_str())
    }

    pub fn used_fallback(&self) -> bool {
        self.results.iter().any(|r| r.used_fallback)
    }
}

/// Result of a job that ran to completion.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub text: String,
    pub units: Vec<UnitResult>,
    pub model_used: Option<String>,
    pub used_fallback: bool,
    pub stats: JobStats,
}

/// A sequence of units to transcribe one after another.
pub struct Job {
    state: JobState,
    ctx: JobContext,
    started: Option<Instant>,
}

impl Job {
    pub fn new(units: Vec<UploadUnit>, ctx: JobContext) -> Self {
        let stats = JobStats {
            total_units: units.len(),
            ..JobStats::default()
        };
        Self {
            state: JobState {
                units,
                text: String::new(),
                results: Vec::new(),
                status: JobStatus::Pending,
                stats,
            },
            ctx,
            started: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Process the next unit.
    ///
    /// Returns `None` once the job has finished (completed, failed or
    /// cancelled). A failing unit is returned as the job-level error and
    /// ends the job.
    pub async fn step(&mut self) -> Option<Result<UnitResult, TranscribeError>> {
        match self.state.status {
            JobStatus::Pending => {
                if !self.start() {
                    return None;
                }
            }
            JobStatus::Running => {}
            _ => return None,
        }

        let index = self.state.results.len();
        let total = self.state.units.len();
        let unit = self.state.units[index].clone();

        if index > 0 && !self.ctx.pacing.is_zero() {
            if let Some(cb) = &self.ctx.progress {
                cb.on_status(&format!(
                    "Waiting {} ms before unit {}/{}",
                    self.ctx.pacing.as_millis(),
                    index + 1,
                    total
                ));
            }
            if sleep_or_cancel(self.ctx.pacing, self.ctx.cancel.as_ref())
                .await
                .is_err()
            {
                return Some(Err(self.finish_cancelled()));
            }
        }
        if self.ctx.is_cancelled() {
            return Some(Err(self.finish_cancelled()));
        }

        match self.process(index, &unit).await {
            Ok(result) => {
                self.accept(&result);
                if self.state.results.len() == total {
                    self.finish(JobStatus::Completed);
                }
                Some(Ok(result))
            }
            Err(TranscribeError::Cancelled) => Some(Err(self.finish_cancelled())),
            Err(e) => Some(Err(self.finish_failed(index, &unit, e))),
        }
    }

    /// Drive the job to completion.
    pub async fn run(&mut self) -> Result<JobOutcome, TranscribeError> {
        while let Some(result) = self.step().await {
            result?;
        }
        Ok(JobOutcome {
            text: self.state.text.clone(),
            units: self.state.results.clone(),
            model_used: self.state.last_model().map(str::to_string),
            used_fallback: self.state.used_fallback(),
            stats: self.state.stats.clone(),
        })
    }

    /// Move to `Running`. Returns false when there was nothing to do.
    fn start(&mut self) -> bool {
        let total = self.state.units.len();
        self.started = Some(Instant::now());
        info!(
            "Starting job: {} unit(s), models {:?}",
            total,
            self.ctx.chain.models()
        );
        if let Some(cb) = &self.ctx.progress {
            cb.on_job_start(total);
        }
        if total == 0 {
            self.finish(JobStatus::Completed);
            return false;
        }
        self.state.status = JobStatus::Running;
        true
    }

    async fn process(&self, index: usize, unit: &UploadUnit) -> Result<UnitResult, TranscribeError> {
        let unit_num = index + 1;
        let total = self.state.units.len();
        let unit_start = Instant::now();
        info!("Unit {}/{}: '{}' ({} bytes)", unit_num, total, unit.name(), unit.len());
        if let Some(cb) = &self.ctx.progress {
            cb.on_unit_start(unit_num, total, unit.name());
        }

        let inline = self.ctx.inline_limit_bytes > 0 && unit.len() <= self.ctx.inline_limit_bytes;
        let (content, uploaded_bytes) = if inline {
            debug!("Sending '{}' inline", unit.name());
            (ContentRef::inline(unit), 0)
        } else {
            let progress = self.ctx.progress.as_ref();
            let handle = upload_unit(
                self.ctx.transport.as_ref(),
                unit,
                self.ctx.chunk_size,
                self.ctx.cancel.as_ref(),
                |sent, total_bytes| {
                    if let Some(cb) = progress {
                        cb.on_upload_progress(unit_num, sent, total_bytes);
                    }
                },
            )
            .await
            .map_err(|e| match e {
                UploadError::Cancelled { .. } => TranscribeError::Cancelled,
                source => TranscribeError::Upload {
                    unit: unit.name().to_string(),
                    source,
                },
            })?;
            (ContentRef::uploaded(handle, unit), unit.len() as u64)
        };

        let fallback = FallbackContext {
            backend: self.ctx.backend.as_ref(),
            chain: &self.ctx.chain,
            retry: &self.ctx.retry,
            options: &self.ctx.options,
            cancel: self.ctx.cancel.as_ref(),
            progress: self.ctx.progress.as_ref(),
        };
        let outcome = run_with_fallback(&fallback, &content).await?;

        let text = if self.ctx.clean_output {
            clean_text(&outcome.text)
        } else {
            outcome.text
        };

        Ok(UnitResult {
            index: unit_num,
            name: unit.name().to_string(),
            source: unit.source().to_string(),
            part: unit.part(),
            text,
            model_used: outcome.model_used,
            used_fallback: outcome.used_fallback,
            attempts: outcome.attempts,
            uploaded_bytes,
            duration_ms: unit_start.elapsed().as_millis() as u64,
        })
    }

    fn accept(&mut self, result: &UnitResult) {
        let total = self.state.units.len();
        if !self.state.results.is_empty() {
            self.state.text.push_str(&self.ctx.separator.render(result.index));
        }
        self.state.text.push_str(&result.text);
        self.state.stats.record_unit(result);
        self.state.results.push(result.clone());

        info!(
            "Unit {}/{} done with {} ({} chars)",
            result.index,
            total,
            result.model_used,
            result.text.len()
        );
        if let Some(cb) = &self.ctx.progress {
            cb.on_unit_complete(result.index, total, &result.model_used, result.text.len());
            cb.on_text_updated(&self.state.text);
        }
    }

    fn finish(&mut self, status: JobStatus) {
        self.state.status = status;
        if let Some(started) = self.started {
            self.state.stats.total_duration_ms = started.elapsed().as_millis() as u64;
        }
        if let Some(cb) = &self.ctx.progress {
            cb.on_job_complete(self.state.units.len(), self.state.results.len());
        }
    }

    fn finish_cancelled(&mut self) -> TranscribeError {
        warn!(
            "Job cancelled after {}/{} unit(s)",
            self.state.results.len(),
            self.state.units.len()
        );
        self.finish(JobStatus::Cancelled);
        TranscribeError::Cancelled
    }

    fn finish_failed(&mut self, index: usize, unit: &UploadUnit, error: TranscribeError) -> TranscribeError {
        let total = self.state.units.len();
        let completed = self.state.results.len();
        warn!("Unit {}/{} ('{}') failed: {}", index + 1, total, unit.name(), error);
        if let Some(cb) = &self.ctx.progress {
            cb.on_unit_error(index + 1, total, &error.to_string());
        }
        self.finish(JobStatus::Failed);
        TranscribeError::JobAborted {
            unit: index + 1,
            name: unit.name().to_string(),
            completed,
            total,
            partial_text: self.state.text.clone(),
            source: Box::new(error),
        }
    }
}

/*!
 * Segment executor.
 *
 * Runs one segment through the completion service: build the prompt, call
 * the backend, extract and validate the payload, copy the input timing onto
 * the output. Failed attempts are retried with exponential backoff up to
 * `max_retries` attempts in total. Every status change of the segment is
 * written to the store as it happens.
 *
 * A stop request is honoured between attempts and during backoff: the
 * segment goes back to `pending` and the call returns `Interrupted`.
 */

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, warn};

use crate::app_config::ExecutionConfig;
use crate::database::{SegmentStatus, SegmentTask, TaskStore};
use crate::errors::SegmentError;
use crate::language::normalize_code;
use crate::providers::{CompletionService, RequestKind};
use crate::subtitle::SubtitleEntry;
use crate::translation::prompts::PromptBuilder;
use crate::translation::response::{RawEntry, extract_entries};
use crate::translation::segmentation::Segment;
use crate::translation::similarity::normalize;

/// Language codes whose text is not normally written in Latin script
const NON_LATIN_LANGUAGES: &[&str] = &[
    "ar", "bg", "bn", "el", "fa", "he", "hi", "ja", "ka", "ko", "mr", "ru", "sr", "ta", "th",
    "uk", "ur", "zh",
];

/// Granularity of stop checks while waiting out a backoff
const STOP_POLL: Duration = Duration::from_millis(20);

/// Something that can ask a running segment to stop
pub trait StopRequest: Send + Sync + fmt::Debug {
    fn is_requested(&self) -> bool;
}

/// Output of a successful segment run
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOutput {
    /// Translated entries carrying the input timing
    pub entries: Vec<SubtitleEntry>,
    /// Positions of entries that look untranslated
    pub flagged: Vec<usize>,
}

/// Executes segments against a completion service with retry
#[derive(Debug, Clone)]
pub struct SegmentExecutor {
    service: Arc<dyn CompletionService>,
    store: Arc<dyn TaskStore>,
    prompts: PromptBuilder,
    config: ExecutionConfig,
    target_language: String,
    stop: Option<Arc<dyn StopRequest>>,
}

impl SegmentExecutor {
    /// Create an executor for one task
    pub fn new(
        service: Arc<dyn CompletionService>,
        store: Arc<dyn TaskStore>,
        prompts: PromptBuilder,
        config: ExecutionConfig,
        target_language: &str,
    ) -> Self {
        Self {
            service,
            store,
            prompts,
            config,
            target_language: target_language.to_string(),
            stop: None,
        }
    }

    /// Observe `stop` between attempts
    pub fn with_stop(mut self, stop: Arc<dyn StopRequest>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Translate a segment, updating `record` and the store along the way
    ///
    /// Makes at most `max_retries` attempts. On success the record ends up
    /// `completed` with the result attached; on exhaustion it ends up
    /// `failed` with the last error message. When stopped it ends up
    /// `pending` again.
    pub async fn execute(
        &self,
        segment: &Segment,
        record: &mut SegmentTask,
    ) -> Result<SegmentOutput, SegmentError> {
        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = SegmentError::Validation("No attempt made".to_string());

        for attempt in 1..=max_attempts {
            if self.stop_requested() {
                return self.interrupt(segment, record).await;
            }

            record.status = SegmentStatus::Translating;
            record.retry_count = i64::from(attempt - 1);
            self.persist(record).await;

            let started = Instant::now();
            match self.attempt(segment).await {
                Ok(output) => {
                    record.status = SegmentStatus::Completed;
                    record.processing_time_ms = Some(started.elapsed().as_millis() as i64);
                    record.error_message = None;
                    record.partial_result = Some(output.entries.clone());
                    record.flagged_entries = output.flagged.clone();
                    self.persist(record).await;

                    debug!(
                        "Segment {} completed on attempt {}/{} ({} entries, {} flagged)",
                        segment.index,
                        attempt,
                        max_attempts,
                        output.entries.len(),
                        output.flagged.len()
                    );
                    return Ok(output);
                }
                Err(e) => {
                    warn!(
                        "Segment {} attempt {}/{} failed: {}",
                        segment.index, attempt, max_attempts, e
                    );
                    record.error_message = Some(e.to_string());
                    last_error = e;

                    if self.stop_requested() {
                        return self.interrupt(segment, record).await;
                    }
                    if attempt < max_attempts {
                        record.status = SegmentStatus::Retrying;
                        self.persist(record).await;
                        if !self.backoff(backoff_delay(self.config.retry_backoff_ms, attempt)).await {
                            return self.interrupt(segment, record).await;
                        }
                    }
                }
            }
        }

        record.status = SegmentStatus::Failed;
        record.error_message = Some(last_error.to_string());
        self.persist(record).await;
        error!(
            "Segment {} failed after {} attempts: {}",
            segment.index, max_attempts, last_error
        );

        Err(last_error)
    }

    /// One completion round trip for a segment
    async fn attempt(&self, segment: &Segment) -> Result<SegmentOutput, SegmentError> {
        let entries = complete_entries(
            self.service.as_ref(),
            &self.prompts,
            RequestKind::Translate,
            &segment.entries,
        )
        .await?;

        let flagged = entries
            .iter()
            .zip(segment.entries.iter())
            .enumerate()
            .filter(|(_, (out, src))| {
                looks_untranslated(
                    &src.text,
                    &out.text,
                    &self.target_language,
                    self.config.untranslated_min_chars,
                )
            })
            .map(|(i, _)| i)
            .collect();

        Ok(SegmentOutput { entries, flagged })
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| stop.is_requested())
    }

    /// Sleep for `delay`; `false` if a stop request cut it short
    async fn backoff(&self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(STOP_POLL)).await;
        }
    }

    /// Hand the segment back for a later execution
    async fn interrupt(
        &self,
        segment: &Segment,
        record: &mut SegmentTask,
    ) -> Result<SegmentOutput, SegmentError> {
        debug!("Segment {} interrupted by stop request", segment.index);
        record.reset_for_dispatch();
        self.persist(record).await;
        Err(SegmentError::Interrupted)
    }

    async fn persist(&self, record: &SegmentTask) {
        if let Err(e) = self.store.update_segment_task(record).await {
            error!(
                "Failed to persist segment {} of task {}: {}",
                record.segment_index, record.task_id, e
            );
        }
    }
}

/// Delay before the attempt following `attempt` (1-based)
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor))
}

/// Send one request and return validated entries with the input timing
pub async fn complete_entries(
    service: &dyn CompletionService,
    prompts: &PromptBuilder,
    kind: RequestKind,
    input: &[SubtitleEntry],
) -> Result<Vec<SubtitleEntry>, SegmentError> {
    let request = prompts.build(kind, input);
    let raw = service.complete(&request).await?;
    let parsed = extract_entries(&raw)?;
    validate_entries(input, parsed)
}

/// Check the payload shape and copy input timing onto the output
pub fn validate_entries(
    input: &[SubtitleEntry],
    output: Vec<RawEntry>,
) -> Result<Vec<SubtitleEntry>, SegmentError> {
    if output.len() != input.len() {
        return Err(SegmentError::Validation(format!(
            "Expected {} entries, got {}",
            input.len(),
            output.len()
        )));
    }

    input
        .iter()
        .zip(output)
        .enumerate()
        .map(|(i, (source, raw))| {
            if raw.start.is_none() || raw.end.is_none() {
                return Err(SegmentError::Validation(format!(
                    "Entry {} is missing numeric start/end",
                    i
                )));
            }

            let text = raw.text.map(|t| t.trim().to_string()).unwrap_or_default();
            if text.is_empty() {
                return Err(SegmentError::Validation(format!("Entry {} has empty text", i)));
            }

            Ok(source.with_text(text))
        })
        .collect()
}

/// Whether `output` looks like it was left in the source language
pub fn looks_untranslated(source: &str, output: &str, target_language: &str, min_chars: usize) -> bool {
    let output = output.trim();
    if output.chars().count() < min_chars {
        return false;
    }

    if normalize(output) == normalize(source) {
        return true;
    }

    let latin_run = output
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace());
    let source_latin = source.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_ascii());
    let target_code = normalize_code(target_language).unwrap_or_else(|_| target_language.to_lowercase());

    latin_run && source_latin && NON_LATIN_LANGUAGES.contains(&target_code.as_str())
}

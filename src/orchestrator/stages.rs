/*!
 * Stage engine.
 *
 * One execution drives a task from its stored status to completion, one
 * stage at a time. Each stage reads what the previous one persisted, so a
 * later execution can enter at any stage and reach the same result.
 * Control signals are observed between stages, at segment dispatch and
 * between retry attempts; a stop request wins over a segment failure.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::database::models::now_rfc3339;
use crate::database::{NotificationKind, SegmentStatus, SegmentTask, TaskStatus, TranslationTask, VideoRecord};
use crate::enhancement::{EnhancementOrchestrator, FeatureExecutionStatus};
use crate::errors::{OrchestratorError, OrchestratorResult, SegmentError, SourceError};
use crate::subtitle::SubtitleEntry;
use crate::translation::executor::SegmentExecutor;
use crate::translation::prompts::PromptBuilder;
use crate::translation::segmentation::Segment;

use super::TaskOrchestrator;
use super::pool::{SegmentJob, WorkerPool};
use super::registry::{ControlSignal, ExecutionControl, RegistrationGuard};

/// Progress when segmentation finished
const SEGMENTED_PROGRESS: f64 = 5.0;
/// Progress band covered by segment translation
const TRANSLATION_BASE: f64 = 10.0;
const TRANSLATION_SPAN: f64 = 75.0;
const TRANSLATED_PROGRESS: f64 = 88.0;
const MERGED_PROGRESS: f64 = 92.0;

/// What the drive loop does after a stage
enum StageFlow {
    Next,
    Suspend(ControlSignal),
}

enum RunError {
    /// The task cannot proceed; it ends up `failed`
    Task(String),
    /// The store failed; the execution is aborted
    Store(anyhow::Error),
}

impl From<anyhow::Error> for RunError {
    fn from(e: anyhow::Error) -> Self {
        RunError::Store(e)
    }
}

impl From<SourceError> for RunError {
    fn from(e: SourceError) -> Self {
        RunError::Task(e.to_string())
    }
}

/// State shared by the stages of one execution
struct RunContext {
    video: VideoRecord,
    control: Arc<ExecutionControl>,
    prompts: PromptBuilder,
    /// Source entries, fetched at most once per execution
    source: Option<Vec<SubtitleEntry>>,
}

/// Overall progress once `completed` of `total` segments are translated
pub(crate) fn translating_progress(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return TRANSLATION_BASE;
    }
    let ratio = (completed as f64 / total as f64).clamp(0.0, 1.0);
    TRANSLATION_BASE + TRANSLATION_SPAN * ratio
}

fn segment_record(task_id: &str, segment: &Segment) -> SegmentTask {
    SegmentTask::new(
        task_id,
        segment.index as i64,
        segment.start_index as i64,
        segment.end_index as i64,
        segment.character_count as i64,
        segment.estimated_tokens as i64,
    )
}

impl TaskOrchestrator {
    /// Run a registered task until it completes, fails or is suspended
    pub(super) async fn execute(&self, guard: RegistrationGuard) -> OrchestratorResult<TranslationTask> {
        let task_id = guard.task_id().to_string();
        let mut task = self.load_task(&task_id).await?;

        if !task.status.is_active() {
            return Err(OrchestratorError::InvalidState {
                task_id,
                message: format!("cannot execute a {} task", task.status),
            });
        }

        let Some(video) = self.inner.store.get_video(&task.video_id).await? else {
            let message = format!("Video not found: {}", task.video_id);
            self.finish_failed(&mut task, message).await?;
            self.inner.broadcaster.close(&task_id);
            return Ok(task);
        };

        if task.started_at.is_none() {
            task.started_at = Some(now_rfc3339());
        }
        info!(
            "Executing task {} ({} -> {}) from {}",
            task.id, video.source_language, task.target_language, task.status
        );

        let completion = &self.inner.config.completion;
        let prompts = PromptBuilder::new(&video.source_language, &task.target_language, &completion.system_prompt)
            .with_temperature(completion.temperature);
        let mut ctx = RunContext {
            video,
            control: guard.control(),
            prompts,
            source: None,
        };

        let result = match self.drive(&mut task, &mut ctx).await {
            Ok(None) => Ok(()),
            Ok(Some(signal)) => self.finish_suspended(&mut task, signal).await.map_err(OrchestratorError::from),
            Err(RunError::Task(message)) => self.finish_failed(&mut task, message).await.map_err(OrchestratorError::from),
            Err(RunError::Store(e)) => {
                error!("Task {} aborted on store error: {}", task.id, e);
                if let Err(mark_err) = self.finish_failed(&mut task, format!("Store error: {}", e)).await {
                    error!("Could not mark task {} failed: {}", task.id, mark_err);
                }
                Err(OrchestratorError::Store(e))
            }
        };

        self.inner.broadcaster.close(&task_id);
        drop(guard);
        result.map(|_| task)
    }

    /// Dispatch stages until the task completes or a signal stops it
    async fn drive(
        &self,
        task: &mut TranslationTask,
        ctx: &mut RunContext,
    ) -> Result<Option<ControlSignal>, RunError> {
        loop {
            if task.status == TaskStatus::Completed {
                return Ok(None);
            }
            if let Some(signal) = ctx.control.signal() {
                return Ok(Some(signal));
            }

            debug!("Task {} entering {}", task.id, task.status);
            let flow = match task.status {
                TaskStatus::Queued => self.stage_queued(task, ctx).await?,
                TaskStatus::Segmenting => self.stage_segmenting(task, ctx).await?,
                TaskStatus::Translating => self.stage_translating(task, ctx).await?,
                TaskStatus::Stitching => self.stage_stitching(task).await?,
                TaskStatus::Optimizing => self.stage_optimizing(task, ctx).await?,
                other => return Err(RunError::Task(format!("cannot execute a {} task", other))),
            };

            if let StageFlow::Suspend(signal) = flow {
                return Ok(Some(signal));
            }
        }
    }

    // ===== Stages =====

    /// Fetch the source and short-circuit on a cache hit
    async fn stage_queued(&self, task: &mut TranslationTask, ctx: &mut RunContext) -> Result<StageFlow, RunError> {
        let source = self.source_entries(ctx).await?;
        task.feature_execution_status = FeatureExecutionStatus::from_config(&self.inner.config.enhancement);

        if let Some(entries) = self.inner.cache.lookup(&task.video_id, &task.target_language, &source).await {
            info!("Task {} served from cache ({} entries)", task.id, entries.len());
            task.feature_execution_status.translation.complete(None);
            task.result_entries = Some(entries);
            self.complete(task, "Translation served from cache").await?;
            return Ok(StageFlow::Next);
        }

        self.advance(task, TaskStatus::Segmenting, 1.0, format!("Fetched {} source entries", source.len()))
            .await?;
        Ok(StageFlow::Next)
    }

    /// Pre-translation stages, then split into persisted segments
    async fn stage_segmenting(&self, task: &mut TranslationTask, ctx: &mut RunContext) -> Result<StageFlow, RunError> {
        let source = self.source_entries(ctx).await?;

        let mut status = task.feature_execution_status.clone();
        let prepared = self
            .enhancer(ctx.prompts.clone())
            .run_pre_translation(source, &mut status)
            .await;

        let segments = self.inner.segmenter.segment(&prepared.entries);
        let records: Vec<SegmentTask> = segments.iter().map(|s| segment_record(&task.id, s)).collect();
        self.inner.store.replace_segment_tasks(&task.id, &records).await?;

        info!(
            "Task {}: {} entries split into {} segments",
            task.id,
            prepared.entries.len(),
            records.len()
        );

        task.feature_execution_status = status;
        task.prepared_entries = Some(prepared.entries);
        task.keywords = prepared.keywords;
        task.total_segments = records.len() as i64;
        task.completed_segments = 0;
        task.current_segment = 0;

        let message = format!("Split into {} segments", records.len());
        self.advance(task, TaskStatus::Translating, SEGMENTED_PROGRESS, message)
            .await?;
        Ok(StageFlow::Next)
    }

    /// Dispatch every segment that is not completed and collect outcomes
    async fn stage_translating(&self, task: &mut TranslationTask, ctx: &mut RunContext) -> Result<StageFlow, RunError> {
        let Some(prepared) = task.prepared_entries.clone() else {
            warn!("Task {} has no prepared entries, segmenting again", task.id);
            task.transition(TaskStatus::Segmenting);
            self.persist(task).await?;
            return Ok(StageFlow::Next);
        };

        let segments = self.inner.segmenter.segment(&prepared);
        let records = self.reconcile_segments(task, &segments).await?;

        task.total_segments = records.len() as i64;
        task.completed_segments = records
            .iter()
            .filter(|r| r.status == SegmentStatus::Completed)
            .count() as i64;
        task.progress_percentage = translating_progress(task.completed_segments, task.total_segments);

        let jobs: Vec<SegmentJob> = segments
            .into_iter()
            .zip(records)
            .filter(|(_, record)| record.status.needs_dispatch())
            .map(|(segment, record)| SegmentJob { segment, record })
            .collect();

        task.feature_execution_status.translation.begin();
        self.persist(task).await?;

        let failure = if jobs.is_empty() {
            None
        } else {
            info!(
                "Task {}: dispatching {} of {} segments",
                task.id,
                jobs.len(),
                task.total_segments
            );
            self.run_segments(task, ctx, jobs).await?
        };

        // A stop request outranks a segment failure; continue retries the segment
        if let Some(signal) = ctx.control.signal() {
            if let Some(message) = failure {
                info!("Task {}: {:?} requested, not failing on: {}", task.id, signal, message);
            }
            self.persist(task).await?;
            return Ok(StageFlow::Suspend(signal));
        }
        if let Some(message) = failure {
            task.feature_execution_status.translation.fail(message.as_str());
            return Err(RunError::Task(message));
        }

        self.advance(task, TaskStatus::Stitching, TRANSLATED_PROGRESS, "All segments translated")
            .await?;
        Ok(StageFlow::Next)
    }

    /// Merge the completed segments into one track
    async fn stage_stitching(&self, task: &mut TranslationTask) -> Result<StageFlow, RunError> {
        let segments = self.inner.store.list_segment_tasks(&task.id).await?;
        if segments.is_empty() {
            return Err(RunError::Task("No segments to merge".to_string()));
        }

        let incomplete = segments
            .iter()
            .filter(|s| s.status != SegmentStatus::Completed || s.partial_result.is_none())
            .count();
        if incomplete > 0 {
            warn!(
                "Task {}: {} segments not translated, returning to translation",
                task.id, incomplete
            );
            task.transition(TaskStatus::Translating);
            self.persist(task).await?;
            return Ok(StageFlow::Next);
        }

        let results: Vec<(i64, Vec<SubtitleEntry>)> = segments
            .into_iter()
            .filter_map(|s| s.partial_result.map(|entries| (s.segment_index, entries)))
            .collect();
        let (merged, report) = self.inner.merger.merge_with_report(results);

        if !task.feature_execution_status.translation.is_completed() {
            task.feature_execution_status.translation.complete(None);
        }
        task.completed_segments = task.total_segments;
        task.estimated_time_remaining = Some(0.0);

        let message = format!(
            "Merged {} entries into {} ({} deduplicated, {} dropped, {} joined)",
            report.input_entries,
            merged.len(),
            report.deduplicated,
            report.dropped,
            report.joined
        );
        task.result_entries = Some(merged);
        self.advance(task, TaskStatus::Optimizing, MERGED_PROGRESS, message).await?;
        Ok(StageFlow::Next)
    }

    /// Post-translation stages, scoring and cache write
    async fn stage_optimizing(&self, task: &mut TranslationTask, ctx: &mut RunContext) -> Result<StageFlow, RunError> {
        let Some(merged) = task.result_entries.clone() else {
            warn!("Task {} has no merged result, merging again", task.id);
            task.transition(TaskStatus::Stitching);
            self.persist(task).await?;
            return Ok(StageFlow::Next);
        };

        let enhancer = self.enhancer(ctx.prompts.clone());
        let mut status = task.feature_execution_status.clone();
        let entries = enhancer.run_post_translation(merged, &task.keywords, &mut status).await;
        let quality = enhancer.quality_score(&status, &task.keywords, &entries);

        match self.source_entries(ctx).await {
            Ok(source) => {
                self.inner
                    .cache
                    .store(
                        &task.video_id,
                        &task.target_language,
                        &source,
                        &entries,
                        &self.inner.config.completion.model,
                    )
                    .await
            }
            Err(e) => warn!("Task {}: not caching result, source unavailable: {}", task.id, e),
        }

        let failed = status.failed_features();
        if !failed.is_empty() {
            warn!("Task {} completed with failed stages: {:?}", task.id, failed);
        }

        task.feature_execution_status = status;
        task.result_entries = Some(entries);
        task.quality_score = quality;
        self.complete(task, "Translation completed").await?;
        Ok(StageFlow::Next)
    }

    // ===== Segment dispatch =====

    /// Reuse stored segment records when their boundaries still match
    async fn reconcile_segments(
        &self,
        task: &TranslationTask,
        segments: &[Segment],
    ) -> Result<Vec<SegmentTask>, RunError> {
        let stored = self.inner.store.list_segment_tasks(&task.id).await?;

        let matches = stored.len() == segments.len()
            && stored.iter().zip(segments).all(|(record, segment)| {
                record.segment_index == segment.index as i64
                    && record.start_index == segment.start_index as i64
                    && record.end_index == segment.end_index as i64
            });

        if !matches {
            warn!(
                "Task {}: stored segments do not match the prepared entries, rebuilding",
                task.id
            );
            let records: Vec<SegmentTask> = segments.iter().map(|s| segment_record(&task.id, s)).collect();
            self.inner.store.replace_segment_tasks(&task.id, &records).await?;
            return Ok(records);
        }

        let mut records = stored;
        for record in records.iter_mut() {
            let lost_result = record.status == SegmentStatus::Completed && record.partial_result.is_none();
            let interrupted = record.status.needs_dispatch() && record.status != SegmentStatus::Pending;
            if lost_result || interrupted {
                debug!(
                    "Task {}: segment {} was {}, queueing again",
                    task.id, record.segment_index, record.status
                );
                record.reset_for_dispatch();
                self.inner.store.update_segment_task(record).await?;
            }
        }
        Ok(records)
    }

    /// Run jobs through the worker pool; returns the first failure message
    async fn run_segments(
        &self,
        task: &mut TranslationTask,
        ctx: &RunContext,
        jobs: Vec<SegmentJob>,
    ) -> Result<Option<String>, RunError> {
        let execution = &self.inner.config.execution;
        let executor = SegmentExecutor::new(
            self.inner.service.clone(),
            self.inner.store.clone(),
            ctx.prompts.clone().with_keywords(&task.keywords),
            execution.clone(),
            &task.target_language,
        )
        .with_stop(ctx.control.clone());

        let halt = Arc::new(AtomicBool::new(false));
        let pool = WorkerPool::new(execution.concurrency, execution.queue_capacity);
        let (mut outcomes, handle) = pool.spawn(executor, jobs, ctx.control.clone(), halt.clone());

        let heartbeat_secs = (self.inner.config.recovery.heartbeat_stale_secs / 4).max(1) as u64;
        let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs));
        heartbeat.tick().await;

        let started = Instant::now();
        let total = task.total_segments.max(1);
        let mut finished = 0u32;
        let mut quartile = task.completed_segments * 4 / total;
        let mut first_failure: Option<String> = None;

        loop {
            tokio::select! {
                outcome = outcomes.recv() => {
                    let Some(outcome) = outcome else {
                        break;
                    };

                    match outcome.result {
                        Ok(output) => {
                            finished += 1;
                            task.completed_segments += 1;
                            task.current_segment = outcome.record.segment_index;

                            let elapsed = started.elapsed().as_secs_f64();
                            let speed = if elapsed > 0.0 { f64::from(finished) / elapsed } else { 0.0 };
                            let remaining = (task.total_segments - task.completed_segments).max(0) as f64;
                            task.translation_speed = Some(speed);
                            task.estimated_time_remaining = (speed > 0.0).then(|| remaining / speed);
                            task.progress_percentage =
                                translating_progress(task.completed_segments, task.total_segments);
                            self.persist(task).await?;

                            if !output.flagged.is_empty() {
                                warn!(
                                    "Task {}: segment {} has {} entries that look untranslated",
                                    task.id,
                                    outcome.record.segment_index,
                                    output.flagged.len()
                                );
                            }
                            self.publish(
                                task,
                                format!(
                                    "Segment {} translated ({}/{})",
                                    outcome.record.segment_index, task.completed_segments, task.total_segments
                                ),
                            );

                            let reached = task.completed_segments * 4 / total;
                            if reached > quartile && reached < 4 {
                                let message = format!("Translation {}% complete", reached * 25);
                                self.notify(task, NotificationKind::Progress, &message).await?;
                            }
                            quartile = quartile.max(reached);
                        }
                        Err(SegmentError::Interrupted) => {
                            debug!(
                                "Task {}: segment {} handed back on stop request",
                                task.id, outcome.record.segment_index
                            );
                        }
                        Err(e) => {
                            halt.store(true, Ordering::SeqCst);
                            if first_failure.is_none() {
                                first_failure =
                                    Some(format!("Segment {} failed: {}", outcome.record.segment_index, e));
                            }
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    self.persist(task).await?;
                }
            }
        }

        if let Err(e) = handle.await {
            warn!("Worker pool for task {} panicked: {}", task.id, e);
        }
        Ok(first_failure)
    }

    // ===== Helpers =====

    async fn source_entries(&self, ctx: &mut RunContext) -> Result<Vec<SubtitleEntry>, SourceError> {
        if let Some(entries) = &ctx.source {
            return Ok(entries.clone());
        }
        let entries = self.inner.source.fetch_subtitles(&ctx.video).await?;
        ctx.source = Some(entries.clone());
        Ok(entries)
    }

    fn enhancer(&self, prompts: PromptBuilder) -> EnhancementOrchestrator {
        EnhancementOrchestrator::new(
            self.inner.config.enhancement.clone(),
            &self.inner.config.merge,
            self.inner.service.clone(),
            prompts,
            self.inner.classifier.clone(),
        )
    }

    /// Move to `status`, persist and publish
    async fn advance(
        &self,
        task: &mut TranslationTask,
        status: TaskStatus,
        progress: f64,
        message: impl Into<String>,
    ) -> anyhow::Result<()> {
        task.transition(status);
        task.progress_percentage = progress;
        self.persist(task).await?;
        self.publish(task, message);
        Ok(())
    }

    async fn complete(&self, task: &mut TranslationTask, message: &str) -> anyhow::Result<()> {
        task.transition(TaskStatus::Completed);
        task.progress_percentage = 100.0;
        task.estimated_time_remaining = Some(0.0);
        task.completed_at = Some(now_rfc3339());
        self.persist(task).await?;
        self.notify(task, NotificationKind::Completed, message).await?;
        self.publish(task, message);
        info!("Task {} completed", task.id);
        Ok(())
    }

    async fn finish_suspended(&self, task: &mut TranslationTask, signal: ControlSignal) -> anyhow::Result<()> {
        match signal {
            ControlSignal::Pause => {
                task.transition(TaskStatus::Paused);
                task.paused_at = Some(now_rfc3339());
                self.persist(task).await?;
                self.notify(task, NotificationKind::Paused, "Task paused").await?;
                self.publish(task, "Task paused");
                info!("Task {} paused", task.id);
            }
            ControlSignal::Cancel => {
                task.transition(TaskStatus::Cancelled);
                self.persist(task).await?;
                self.publish(task, "Task cancelled");
                info!("Task {} cancelled", task.id);
            }
        }
        Ok(())
    }

    async fn finish_failed(&self, task: &mut TranslationTask, message: String) -> anyhow::Result<()> {
        error!("Task {} failed: {}", task.id, message);
        task.transition(TaskStatus::Failed);
        task.error_message = Some(message.clone());
        self.persist(task).await?;
        self.notify(task, NotificationKind::Failed, &message).await?;
        self.publish(task, message);
        Ok(())
    }
}

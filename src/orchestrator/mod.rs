/*!
 * Task orchestration.
 *
 * `TaskOrchestrator` owns everything a translation task needs at runtime:
 * the store, the content source, the completion service, the segmenter,
 * the merger, the result cache, the progress broadcaster and the registry
 * of live executions. It is constructed once and cloned cheaply wherever a
 * handle is needed.
 *
 * A task moves through `queued → segmenting → translating → stitching →
 * optimizing → completed`, and can end up `failed`, `paused` or
 * `cancelled` from any active status. Every step is persisted before the
 * next one starts, so an interrupted task can always be picked up again
 * from its stored state (see `recovery`).
 */

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::app_config::Config;
use crate::database::models::now_rfc3339;
use crate::database::{NotificationKind, TaskNotification, TaskStatus, TaskStore, TranslationTask, VideoRecord};
use crate::enhancement::FeatureExecutionStatus;
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::language::normalize_code;
use crate::progress::{ProgressBroadcaster, ProgressEvent};
use crate::providers::CompletionService;
use crate::sources::ContentSource;
use crate::subtitle::SubtitleEntry;
use crate::translation::cache::{CacheStats, ResultCache};
use crate::translation::continuity::{ContinuityClassifier, HeuristicClassifier};
use crate::translation::merge::ResultMerger;
use crate::translation::segmentation::Segmenter;

pub mod pool;
pub mod recovery;
pub mod registry;
mod stages;

pub use registry::{ControlSignal, ExecutionControl, TaskRegistry};

/// How long `delete` waits for a running execution to wind down
const DELETE_WAIT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for an execution to stop
const STOP_POLL: Duration = Duration::from_millis(25);

/// Handle of a spawned task execution
pub type ExecutionHandle = JoinHandle<OrchestratorResult<TranslationTask>>;

/// Administrative actions on a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    /// Discard all progress and run from the start
    Restart,
    /// Resume a paused, failed, cancelled or stale task where it stopped
    Continue,
    /// Suspend at the next dispatch boundary
    Pause,
    /// Abandon at the next dispatch boundary
    Cancel,
    /// Remove the task and everything attached to it
    Delete,
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminAction::Restart => write!(f, "restart"),
            AdminAction::Continue => write!(f, "continue"),
            AdminAction::Pause => write!(f, "pause"),
            AdminAction::Cancel => write!(f, "cancel"),
            AdminAction::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for AdminAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "restart" => Ok(AdminAction::Restart),
            "continue" | "resume" => Ok(AdminAction::Continue),
            "pause" => Ok(AdminAction::Pause),
            "cancel" => Ok(AdminAction::Cancel),
            "delete" => Ok(AdminAction::Delete),
            _ => Err(anyhow::anyhow!("Invalid action: {}", s)),
        }
    }
}

#[derive(Debug)]
struct OrchestratorInner {
    config: Config,
    store: Arc<dyn TaskStore>,
    source: Arc<dyn ContentSource>,
    service: Arc<dyn CompletionService>,
    classifier: Arc<dyn ContinuityClassifier>,
    segmenter: Segmenter,
    merger: ResultMerger,
    cache: ResultCache,
    broadcaster: ProgressBroadcaster,
    registry: TaskRegistry,
}

/// Cloneable handle to the orchestration runtime
#[derive(Debug, Clone)]
pub struct TaskOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl TaskOrchestrator {
    /// Create an orchestrator with the heuristic continuity classifier
    pub fn new(
        config: Config,
        store: Arc<dyn TaskStore>,
        source: Arc<dyn ContentSource>,
        service: Arc<dyn CompletionService>,
    ) -> Self {
        Self::with_classifier(config, store, source, service, Arc::new(HeuristicClassifier::new()))
    }

    /// Create an orchestrator with a custom continuity classifier
    pub fn with_classifier(
        config: Config,
        store: Arc<dyn TaskStore>,
        source: Arc<dyn ContentSource>,
        service: Arc<dyn CompletionService>,
        classifier: Arc<dyn ContinuityClassifier>,
    ) -> Self {
        let segmenter = Segmenter::with_classifier(config.segmentation.clone(), classifier.clone());
        let merger = ResultMerger::with_classifier(config.merge.clone(), classifier.clone());
        let cache = ResultCache::new(store.clone(), &config);

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                store,
                source,
                service,
                classifier,
                segmenter,
                merger,
                cache,
                broadcaster: ProgressBroadcaster::new(),
                registry: TaskRegistry::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.inner.store.clone()
    }

    pub fn broadcaster(&self) -> &ProgressBroadcaster {
        &self.inner.broadcaster
    }

    /// Progress events of a task published from now on
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<ProgressEvent> {
        self.inner.broadcaster.subscribe(task_id)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Whether the task has a live execution in this process
    pub fn is_running(&self, task_id: &str) -> bool {
        self.inner.registry.contains(task_id)
    }

    // ===== Submission and execution =====

    /// Register a video whose subtitles can be fetched from `source_uri`
    pub async fn register_video(
        &self,
        title: &str,
        source_language: &str,
        source_uri: &str,
    ) -> OrchestratorResult<VideoRecord> {
        let language = normalize_code(source_language)
            .map_err(|_| OrchestratorError::InvalidLanguage(source_language.to_string()))?;
        let video = VideoRecord::new(title, &language, source_uri);
        self.inner.store.create_video(&video).await?;
        info!("Registered video {} ({})", video.id, video.title);
        Ok(video)
    }

    /// Create a queued translation task for a video
    pub async fn submit(&self, video_id: &str, target_language: &str) -> OrchestratorResult<TranslationTask> {
        if self.inner.store.get_video(video_id).await?.is_none() {
            return Err(OrchestratorError::VideoNotFound(video_id.to_string()));
        }

        let language = normalize_code(target_language)
            .map_err(|_| OrchestratorError::InvalidLanguage(target_language.to_string()))?;

        let mut task = TranslationTask::new(video_id, &language);
        task.feature_execution_status = FeatureExecutionStatus::from_config(&self.inner.config.enhancement);
        self.inner.store.create_task(&task).await?;

        info!("Submitted task {} ({} -> {})", task.id, video_id, language);
        Ok(task)
    }

    /// Spawn an execution of the task in the background
    ///
    /// Fails with `AlreadyRunning` when the task already has a live
    /// execution; the check happens before anything is spawned.
    pub fn start(&self, task_id: &str) -> OrchestratorResult<ExecutionHandle> {
        let guard = self
            .inner
            .registry
            .register(task_id)
            .ok_or_else(|| OrchestratorError::AlreadyRunning(task_id.to_string()))?;

        let orchestrator = self.clone();
        Ok(tokio::spawn(async move { orchestrator.execute(guard).await }))
    }

    /// Execute the task until it completes, fails or is suspended
    pub async fn run(&self, task_id: &str) -> OrchestratorResult<TranslationTask> {
        let guard = self
            .inner
            .registry
            .register(task_id)
            .ok_or_else(|| OrchestratorError::AlreadyRunning(task_id.to_string()))?;

        self.execute(guard).await
    }

    /// Continue a suspended task inline and wait for the outcome
    pub async fn resume(&self, task_id: &str) -> OrchestratorResult<TranslationTask> {
        if self.is_running(task_id) {
            return Err(OrchestratorError::AlreadyRunning(task_id.to_string()));
        }
        let mut task = self.load_task(task_id).await?;
        if !self.prepare_continue(&mut task).await? {
            return Err(OrchestratorError::InvalidState {
                task_id: task_id.to_string(),
                message: format!("cannot continue a {} task", task.status),
            });
        }
        self.run(task_id).await
    }

    // ===== Queries =====

    pub async fn status(&self, task_id: &str) -> OrchestratorResult<TranslationTask> {
        self.load_task(task_id).await
    }

    /// Translated entries of completed segments, by segment index
    pub async fn partial_results(&self, task_id: &str) -> OrchestratorResult<Vec<(i64, Vec<SubtitleEntry>)>> {
        self.load_task(task_id).await?;
        let segments = self.inner.store.list_segment_tasks(task_id).await?;
        Ok(segments
            .into_iter()
            .filter_map(|segment| segment.partial_result.map(|entries| (segment.segment_index, entries)))
            .collect())
    }

    /// Final entries of a completed task
    pub async fn result(&self, task_id: &str) -> OrchestratorResult<Option<Vec<SubtitleEntry>>> {
        let task = self.load_task(task_id).await?;
        Ok(match task.status {
            TaskStatus::Completed => task.result_entries,
            _ => None,
        })
    }

    pub async fn notifications(&self, task_id: &str) -> OrchestratorResult<Vec<TaskNotification>> {
        self.load_task(task_id).await?;
        Ok(self.inner.store.list_notifications(task_id).await?)
    }

    // ===== Administration =====

    /// Apply an administrative action; `false` when it does not apply
    pub async fn control(&self, task_id: &str, action: AdminAction) -> OrchestratorResult<bool> {
        let mut task = self.load_task(task_id).await?;
        info!("Task {}: {} requested while {}", task_id, action, task.status);

        match action {
            AdminAction::Pause => {
                if let Some(control) = self.inner.registry.get(task_id) {
                    control.request_pause();
                    return Ok(true);
                }
                if !task.status.is_active() {
                    return Ok(false);
                }
                task.transition(TaskStatus::Paused);
                task.paused_at = Some(now_rfc3339());
                self.persist(&mut task).await?;
                self.notify(&task, NotificationKind::Paused, "Task paused").await?;
                self.publish(&task, "Task paused");
                Ok(true)
            }

            AdminAction::Cancel => {
                if let Some(control) = self.inner.registry.get(task_id) {
                    control.request_cancel();
                    return Ok(true);
                }
                if task.status.is_terminal() {
                    return Ok(false);
                }
                task.transition(TaskStatus::Cancelled);
                self.persist(&mut task).await?;
                self.publish(&task, "Task cancelled");
                Ok(true)
            }

            AdminAction::Continue => {
                if self.is_running(task_id) || !self.prepare_continue(&mut task).await? {
                    return Ok(false);
                }
                self.spawn_detached(task_id);
                Ok(true)
            }

            AdminAction::Restart => {
                if self.is_running(task_id) {
                    return Ok(false);
                }
                self.reset(&mut task).await?;
                self.spawn_detached(task_id);
                Ok(true)
            }

            AdminAction::Delete => {
                if let Some(control) = self.inner.registry.get(task_id) {
                    control.request_cancel();
                    self.wait_until_stopped(task_id).await;
                }
                let deleted = self.inner.store.delete_task(task_id).await?;
                self.inner.broadcaster.close(task_id);
                Ok(deleted)
            }
        }
    }

    /// Put a suspended task back into its resume stage
    async fn prepare_continue(&self, task: &mut TranslationTask) -> OrchestratorResult<bool> {
        match task.status {
            TaskStatus::Completed => Ok(false),
            status if status.is_active() => Ok(true),
            _ => {
                let stage = task.resume_point();
                task.transition(stage);
                task.error_message = None;
                task.paused_at = None;
                self.persist(task).await?;
                Ok(true)
            }
        }
    }

    /// Drop all progress of a task and queue it again
    async fn reset(&self, task: &mut TranslationTask) -> OrchestratorResult<()> {
        self.inner.store.replace_segment_tasks(&task.id, &[]).await?;

        task.transition(TaskStatus::Queued);
        task.resume_stage = None;
        task.total_segments = 0;
        task.completed_segments = 0;
        task.current_segment = 0;
        task.progress_percentage = 0.0;
        task.estimated_time_remaining = None;
        task.translation_speed = None;
        task.feature_execution_status = FeatureExecutionStatus::from_config(&self.inner.config.enhancement);
        task.error_message = None;
        task.prepared_entries = None;
        task.keywords.clear();
        task.result_entries = None;
        task.quality_score = None;
        task.paused_at = None;
        task.started_at = None;
        task.completed_at = None;

        self.persist(task).await?;
        Ok(())
    }

    fn spawn_detached(&self, task_id: &str) {
        match self.start(task_id) {
            Ok(_handle) => {}
            Err(e) => warn!("Could not start task {}: {}", task_id, e),
        }
    }

    async fn wait_until_stopped(&self, task_id: &str) {
        let deadline = tokio::time::Instant::now() + DELETE_WAIT;
        while self.is_running(task_id) {
            if tokio::time::Instant::now() >= deadline {
                warn!("Task {} still running after cancel, deleting anyway", task_id);
                return;
            }
            tokio::time::sleep(STOP_POLL).await;
        }
    }

    // ===== Shared helpers =====

    async fn load_task(&self, task_id: &str) -> OrchestratorResult<TranslationTask> {
        self.inner
            .store
            .get_task(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))
    }

    /// Write the task, refreshing its heartbeat
    async fn persist(&self, task: &mut TranslationTask) -> anyhow::Result<()> {
        let now = now_rfc3339();
        task.last_heartbeat = now.clone();
        task.updated_at = now;
        self.inner.store.update_task(task).await
    }

    async fn notify(&self, task: &TranslationTask, kind: NotificationKind, message: &str) -> anyhow::Result<()> {
        self.inner.store.add_notification(&task.id, kind, message).await?;
        Ok(())
    }

    fn publish(&self, task: &TranslationTask, message: impl Into<String>) {
        let event = ProgressEvent::new(&task.id, task.status, task.progress_percentage, message);
        self.inner.broadcaster.publish(event);
    }
}

/*!
 * Database entity models.
 *
 * These structures map directly to database tables and provide
 * type-safe access to persisted data. Timestamps are RFC 3339 strings.
 */

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::enhancement::FeatureExecutionStatus;
use crate::subtitle::SubtitleEntry;

/// Current time as an RFC 3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Translation task status
///
/// The string form is stable: it is what the store persists and what
/// observers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, waiting for its first execution
    Queued,
    /// Fetching source, running pre-translation stages and splitting
    Segmenting,
    /// Segments dispatched to the worker pool
    Translating,
    /// Merging segment results
    Stitching,
    /// Post-translation stages, scoring and cache write
    Optimizing,
    /// Finished successfully
    Completed,
    /// Stopped on an error
    Failed,
    /// Suspended by an operator
    Paused,
    /// Abandoned by an operator
    Cancelled,
}

impl TaskStatus {
    /// Statuses in which a task is expected to have a live execution
    pub const ACTIVE: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Segmenting,
        TaskStatus::Translating,
        TaskStatus::Stitching,
        TaskStatus::Optimizing,
    ];

    /// Whether the task is in one of the pipeline stages
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Whether the task reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    /// Human readable label for the stage
    pub fn phase_label(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "Waiting to start",
            TaskStatus::Segmenting => "Preparing segments",
            TaskStatus::Translating => "Translating segments",
            TaskStatus::Stitching => "Merging results",
            TaskStatus::Optimizing => "Enhancing translation",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
            TaskStatus::Paused => "Paused",
            TaskStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Segmenting => "segmenting",
            TaskStatus::Translating => "translating",
            TaskStatus::Stitching => "stitching",
            TaskStatus::Optimizing => "optimizing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Paused => "paused",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(TaskStatus::Queued),
            "segmenting" => Ok(TaskStatus::Segmenting),
            "translating" => Ok(TaskStatus::Translating),
            "stitching" => Ok(TaskStatus::Stitching),
            "optimizing" => Ok(TaskStatus::Optimizing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "paused" => Ok(TaskStatus::Paused),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(anyhow::anyhow!("Invalid task status: {}", s)),
        }
    }
}

/// Segment task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    /// Waiting for dispatch
    Pending,
    /// Completion call in flight
    Translating,
    /// Result accepted
    Completed,
    /// All attempts exhausted
    Failed,
    /// Waiting for the next attempt
    Retrying,
}

impl SegmentStatus {
    /// Whether a resumed run must dispatch this segment again
    pub fn needs_dispatch(&self) -> bool {
        !matches!(self, SegmentStatus::Completed)
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentStatus::Pending => write!(f, "pending"),
            SegmentStatus::Translating => write!(f, "translating"),
            SegmentStatus::Completed => write!(f, "completed"),
            SegmentStatus::Failed => write!(f, "failed"),
            SegmentStatus::Retrying => write!(f, "retrying"),
        }
    }
}

impl std::str::FromStr for SegmentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SegmentStatus::Pending),
            "translating" => Ok(SegmentStatus::Translating),
            "completed" => Ok(SegmentStatus::Completed),
            "failed" => Ok(SegmentStatus::Failed),
            "retrying" => Ok(SegmentStatus::Retrying),
            _ => Err(anyhow::anyhow!("Invalid segment status: {}", s)),
        }
    }
}

/// Kind of task notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Progress,
    Completed,
    Failed,
    Paused,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Progress => write!(f, "progress"),
            NotificationKind::Completed => write!(f, "completed"),
            NotificationKind::Failed => write!(f, "failed"),
            NotificationKind::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "progress" => Ok(NotificationKind::Progress),
            "completed" => Ok(NotificationKind::Completed),
            "failed" => Ok(NotificationKind::Failed),
            "paused" => Ok(NotificationKind::Paused),
            _ => Err(anyhow::anyhow!("Invalid notification kind: {}", s)),
        }
    }
}

/// Video whose subtitles are being translated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    /// Unique video identifier
    pub id: String,
    /// Display title
    pub title: String,
    /// Language of the original subtitles
    pub source_language: String,
    /// Where the content source finds the subtitles
    pub source_uri: String,
    /// Creation timestamp
    pub created_at: String,
}

impl VideoRecord {
    /// Create a new video record with a generated id
    pub fn new(title: &str, source_language: &str, source_uri: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            source_language: source_language.to_string(),
            source_uri: source_uri.to_string(),
            created_at: now_rfc3339(),
        }
    }
}

/// One translation request for a video
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationTask {
    /// Unique task identifier (UUID)
    pub id: String,
    /// Owning video
    pub video_id: String,
    /// Target language code
    pub target_language: String,
    /// Current state
    pub status: TaskStatus,
    /// Last pipeline stage reached, used when continuing a suspended task
    pub resume_stage: Option<TaskStatus>,
    /// Human readable sub-step label
    pub current_phase: String,
    /// Number of segments
    pub total_segments: i64,
    /// Number of completed segments
    pub completed_segments: i64,
    /// Index of the most recently finished segment
    pub current_segment: i64,
    /// Overall progress (0-100)
    pub progress_percentage: f64,
    /// Estimated seconds remaining
    pub estimated_time_remaining: Option<f64>,
    /// Segments completed per second
    pub translation_speed: Option<f64>,
    /// Per-feature execution records
    pub feature_execution_status: FeatureExecutionStatus,
    /// Last error, if any
    pub error_message: Option<String>,
    /// Source entries after pre-translation stages
    pub prepared_entries: Option<Vec<SubtitleEntry>>,
    /// Keywords extracted from the source
    pub keywords: Vec<String>,
    /// Final translated entries
    pub result_entries: Option<Vec<SubtitleEntry>>,
    /// Weighted quality score (0-1)
    pub quality_score: Option<f64>,
    /// Liveness timestamp refreshed on every write
    pub last_heartbeat: String,
    /// When the task was last paused
    pub paused_at: Option<String>,
    /// When the task first started executing
    pub started_at: Option<String>,
    /// When the task completed
    pub completed_at: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl TranslationTask {
    /// Create a new queued task
    pub fn new(video_id: &str, target_language: &str) -> Self {
        let now = now_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            video_id: video_id.to_string(),
            target_language: target_language.to_string(),
            status: TaskStatus::Queued,
            resume_stage: None,
            current_phase: TaskStatus::Queued.phase_label().to_string(),
            total_segments: 0,
            completed_segments: 0,
            current_segment: 0,
            progress_percentage: 0.0,
            estimated_time_remaining: None,
            translation_speed: None,
            feature_execution_status: FeatureExecutionStatus::default(),
            error_message: None,
            prepared_entries: None,
            keywords: Vec::new(),
            result_entries: None,
            quality_score: None,
            last_heartbeat: now.clone(),
            paused_at: None,
            started_at: None,
            completed_at: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Move to a new status, remembering the stage for later resumption
    pub fn transition(&mut self, status: TaskStatus) {
        if status.is_active() {
            self.resume_stage = Some(status);
        }
        self.status = status;
        self.current_phase = status.phase_label().to_string();
    }

    /// Stage a continued run should re-enter
    pub fn resume_point(&self) -> TaskStatus {
        if self.status.is_active() {
            return self.status;
        }
        self.resume_stage.unwrap_or(TaskStatus::Queued)
    }

    /// Seconds since the last heartbeat, if the timestamp parses
    pub fn heartbeat_age_secs(&self) -> Option<i64> {
        chrono::DateTime::parse_from_rfc3339(&self.last_heartbeat)
            .ok()
            .map(|t| (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).num_seconds())
    }
}

/// Persisted state of one segment of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentTask {
    /// Owning task
    pub task_id: String,
    /// Stable ordering key, unique per task
    pub segment_index: i64,
    /// First prepared entry covered (inclusive)
    pub start_index: i64,
    /// One past the last prepared entry covered
    pub end_index: i64,
    /// Current state
    pub status: SegmentStatus,
    /// Number of entries
    pub subtitle_count: i64,
    /// Number of characters
    pub character_count: i64,
    /// Estimated prompt tokens
    pub estimated_tokens: i64,
    /// Duration of the successful attempt
    pub processing_time_ms: Option<i64>,
    /// Attempts beyond the first
    pub retry_count: i64,
    /// Last error, if any
    pub error_message: Option<String>,
    /// Translated entries once completed
    pub partial_result: Option<Vec<SubtitleEntry>>,
    /// Positions of entries that look untranslated
    pub flagged_entries: Vec<usize>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

impl SegmentTask {
    /// Create a pending segment task
    pub fn new(
        task_id: &str,
        segment_index: i64,
        start_index: i64,
        end_index: i64,
        character_count: i64,
        estimated_tokens: i64,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            task_id: task_id.to_string(),
            segment_index,
            start_index,
            end_index,
            status: SegmentStatus::Pending,
            subtitle_count: end_index - start_index,
            character_count,
            estimated_tokens,
            processing_time_ms: None,
            retry_count: 0,
            error_message: None,
            partial_result: None,
            flagged_entries: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Put the segment back in the queue for a new run
    pub fn reset_for_dispatch(&mut self) {
        self.status = SegmentStatus::Pending;
        self.error_message = None;
        self.retry_count = 0;
        self.partial_result = None;
        self.flagged_entries.clear();
    }
}

/// Cached final translation for a (video, target language) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Video the translation belongs to
    pub video_id: String,
    /// Target language code
    pub target_language: String,
    /// Fingerprint of the source entries
    pub source_fingerprint: String,
    /// Fingerprint of the output-affecting configuration
    pub config_fingerprint: String,
    /// Final translated entries
    pub entries: Vec<SubtitleEntry>,
    /// Model that produced the translation
    pub model_id: String,
    /// Snapshot of the output-affecting configuration (JSON)
    pub config_snapshot: String,
    /// Number of cache hits
    pub access_count: i64,
    /// Last hit timestamp
    pub last_accessed_at: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

/// Append-only notification about a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    /// Database ID
    pub id: i64,
    /// Task the notification is about
    pub task_id: String,
    /// Notification kind
    pub kind: NotificationKind,
    /// Message text
    pub message: String,
    /// Whether the notification has been read
    pub read: bool,
    /// Creation timestamp
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taskStatus_roundTripThroughString() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Segmenting,
            TaskStatus::Translating,
            TaskStatus::Stitching,
            TaskStatus::Optimizing,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Paused,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_transition_shouldRememberActiveStage() {
        let mut task = TranslationTask::new("video", "fr");
        task.transition(TaskStatus::Translating);
        task.transition(TaskStatus::Paused);
        assert_eq!(task.resume_stage, Some(TaskStatus::Translating));
        assert_eq!(task.resume_point(), TaskStatus::Translating);
        assert_eq!(task.current_phase, "Paused");
    }

    #[test]
    fn test_resumePoint_withoutHistory_shouldStartFromQueued() {
        let mut task = TranslationTask::new("video", "fr");
        task.status = TaskStatus::Failed;
        assert_eq!(task.resume_point(), TaskStatus::Queued);
    }

    #[test]
    fn test_heartbeatAge_shouldBeSmallForFreshTask() {
        let task = TranslationTask::new("video", "fr");
        let age = task.heartbeat_age_secs().unwrap();
        assert!((0..5).contains(&age));
    }

    #[test]
    fn test_segmentStatus_needsDispatch() {
        assert!(!SegmentStatus::Completed.needs_dispatch());
        assert!(SegmentStatus::Retrying.needs_dispatch());
        assert!(SegmentStatus::Translating.needs_dispatch());
    }
}

/*!
 * Database module for persistent storage of translation tasks.
 *
 * This module provides SQLite-based persistence for:
 * - Videos and their translation tasks with resume capability
 * - Segment tasks holding per-segment progress and partial results
 * - Translated subtitles cached by content fingerprint
 * - Task notifications
 *
 * The orchestrator only talks to the `TaskStore` trait; `Repository` is
 * the SQLite implementation.
 */

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::DatabaseConnection;
pub use models::{
    CacheEntry, NotificationKind, SegmentStatus, SegmentTask, TaskNotification, TaskStatus,
    TranslationTask, VideoRecord,
};
pub use repository::Repository;

/// Record store used by the orchestrator
///
/// Every write is idempotent: writing the same record twice leaves the
/// store in the same state, which is what makes resumption safe.
#[async_trait]
pub trait TaskStore: Send + Sync + Debug {
    // Videos

    /// Register a video
    async fn create_video(&self, video: &VideoRecord) -> Result<()>;

    /// Get a video by id
    async fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>>;

    /// Delete a video and everything that references it
    async fn delete_video(&self, video_id: &str) -> Result<bool>;

    // Translation tasks

    /// Insert a new task
    async fn create_task(&self, task: &TranslationTask) -> Result<()>;

    /// Get a task by id
    async fn get_task(&self, task_id: &str) -> Result<Option<TranslationTask>>;

    /// Overwrite a task row with the given state
    async fn update_task(&self, task: &TranslationTask) -> Result<()>;

    /// Tasks whose status is one of `statuses`, oldest first
    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TranslationTask>>;

    /// Delete a task with its segments and notifications
    async fn delete_task(&self, task_id: &str) -> Result<bool>;

    // Segment tasks

    /// Replace all segment tasks of a task in one transaction
    async fn replace_segment_tasks(&self, task_id: &str, segments: &[SegmentTask]) -> Result<()>;

    /// Segment tasks of a task ordered by segment index
    async fn list_segment_tasks(&self, task_id: &str) -> Result<Vec<SegmentTask>>;

    /// Overwrite one segment task
    async fn update_segment_task(&self, segment: &SegmentTask) -> Result<()>;

    // Cached translations

    /// Cached translation for a (video, target language) pair
    async fn get_cache_entry(&self, video_id: &str, target_language: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace the cached translation for the entry's key
    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()>;

    /// Increment access statistics after a hit
    async fn record_cache_hit(&self, video_id: &str, target_language: &str) -> Result<()>;

    /// Delete cached translations not updated in `days` days
    async fn purge_cache_older_than(&self, days: i64) -> Result<usize>;

    // Notifications

    /// Append a notification and return its id
    async fn add_notification(&self, task_id: &str, kind: NotificationKind, message: &str) -> Result<i64>;

    /// Notifications of a task, oldest first
    async fn list_notifications(&self, task_id: &str) -> Result<Vec<TaskNotification>>;

    /// Mark a notification read or unread
    async fn set_notification_read(&self, notification_id: i64, read: bool) -> Result<bool>;
}

/*!
 * Repository layer for database operations.
 *
 * This module provides the SQLite implementation of `TaskStore`,
 * abstracting away the SQL details and providing type-safe access.
 * Structured columns (entries, keywords, feature status) are stored as JSON.
 */

use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params, params_from_iter};
use serde::de::DeserializeOwned;

use super::TaskStore;
use super::connection::DatabaseConnection;
use super::models::{
    CacheEntry, NotificationKind, SegmentStatus, SegmentTask, TaskNotification, TaskStatus,
    TranslationTask, VideoRecord, now_rfc3339,
};

const TASK_COLUMNS: &str = "id, video_id, target_language, status, resume_stage, current_phase, \
     total_segments, completed_segments, current_segment, progress_percentage, \
     estimated_time_remaining, translation_speed, feature_execution_status, error_message, \
     prepared_entries, keywords, result_entries, quality_score, last_heartbeat, paused_at, \
     started_at, completed_at, created_at, updated_at";

const SEGMENT_COLUMNS: &str = "task_id, segment_index, start_index, end_index, status, \
     subtitle_count, character_count, estimated_tokens, processing_time_ms, retry_count, \
     error_message, partial_result, flagged_entries, created_at, updated_at";

const CACHE_COLUMNS: &str = "video_id, target_language, source_fingerprint, config_fingerprint, \
     entries, model_id, config_snapshot, access_count, last_accessed_at, created_at, updated_at";

/// Repository for database operations
#[derive(Clone, Debug)]
pub struct Repository {
    /// Database connection
    db: DatabaseConnection,
}

impl Repository {
    /// Create a new repository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create a repository with the default database location
    pub fn new_default() -> Result<Self> {
        let db = DatabaseConnection::new_default()?;
        Ok(Self::new(db))
    }

    /// Create a repository with an in-memory database (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let db = DatabaseConnection::new_in_memory()?;
        Ok(Self::new(db))
    }

    /// Open the configured database, or the default location when unset
    pub fn open(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::new(DatabaseConnection::new(path)?)),
            None => Self::new_default(),
        }
    }

    /// Underlying connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // =========================================================================
    // Row mapping
    // =========================================================================

    fn parse_task_row(row: &Row) -> rusqlite::Result<TranslationTask> {
        Ok(TranslationTask {
            id: row.get(0)?,
            video_id: row.get(1)?,
            target_language: row.get(2)?,
            status: row.get::<_, String>(3)?.parse().unwrap_or(TaskStatus::Queued),
            resume_stage: row
                .get::<_, Option<String>>(4)?
                .and_then(|s| s.parse().ok()),
            current_phase: row.get(5)?,
            total_segments: row.get(6)?,
            completed_segments: row.get(7)?,
            current_segment: row.get(8)?,
            progress_percentage: row.get(9)?,
            estimated_time_remaining: row.get(10)?,
            translation_speed: row.get(11)?,
            feature_execution_status: json_column(row, 12)?,
            error_message: row.get(13)?,
            prepared_entries: optional_json_column(row, 14)?,
            keywords: json_column(row, 15)?,
            result_entries: optional_json_column(row, 16)?,
            quality_score: row.get(17)?,
            last_heartbeat: row.get(18)?,
            paused_at: row.get(19)?,
            started_at: row.get(20)?,
            completed_at: row.get(21)?,
            created_at: row.get(22)?,
            updated_at: row.get(23)?,
        })
    }

    fn parse_segment_row(row: &Row) -> rusqlite::Result<SegmentTask> {
        Ok(SegmentTask {
            task_id: row.get(0)?,
            segment_index: row.get(1)?,
            start_index: row.get(2)?,
            end_index: row.get(3)?,
            status: row.get::<_, String>(4)?.parse().unwrap_or(SegmentStatus::Pending),
            subtitle_count: row.get(5)?,
            character_count: row.get(6)?,
            estimated_tokens: row.get(7)?,
            processing_time_ms: row.get(8)?,
            retry_count: row.get(9)?,
            error_message: row.get(10)?,
            partial_result: optional_json_column(row, 11)?,
            flagged_entries: json_column(row, 12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn parse_cache_row(row: &Row) -> rusqlite::Result<CacheEntry> {
        Ok(CacheEntry {
            video_id: row.get(0)?,
            target_language: row.get(1)?,
            source_fingerprint: row.get(2)?,
            config_fingerprint: row.get(3)?,
            entries: json_column(row, 4)?,
            model_id: row.get(5)?,
            config_snapshot: row.get(6)?,
            access_count: row.get(7)?,
            last_accessed_at: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn parse_notification_row(row: &Row) -> rusqlite::Result<TaskNotification> {
        Ok(TaskNotification {
            id: row.get(0)?,
            task_id: row.get(1)?,
            kind: row
                .get::<_, String>(2)?
                .parse()
                .unwrap_or(NotificationKind::Progress),
            message: row.get(3)?,
            read: row.get::<_, i64>(4)? != 0,
            created_at: row.get(5)?,
        })
    }
}

/// Decode a JSON text column
fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Decode a nullable JSON text column
fn optional_json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        serde_json::from_str(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

#[async_trait]
impl TaskStore for Repository {
    // =========================================================================
    // Video Operations
    // =========================================================================

    async fn create_video(&self, video: &VideoRecord) -> Result<()> {
        let video = video.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT INTO videos (id, title, source_language, source_uri, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        video.id,
                        video.title,
                        video.source_language,
                        video.source_uri,
                        video.created_at
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let video_id = video_id.to_string();

        self.db
            .execute_async(move |conn| {
                let video = conn
                    .query_row(
                        "SELECT id, title, source_language, source_uri, created_at
                         FROM videos WHERE id = ?1",
                        [video_id],
                        |row| {
                            Ok(VideoRecord {
                                id: row.get(0)?,
                                title: row.get(1)?,
                                source_language: row.get(2)?,
                                source_uri: row.get(3)?,
                                created_at: row.get(4)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(video)
            })
            .await
    }

    async fn delete_video(&self, video_id: &str) -> Result<bool> {
        let video_id = video_id.to_string();

        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM videos WHERE id = ?1", [&video_id])?;
                debug!("Deleted video {} ({} rows)", video_id, deleted);
                Ok(deleted > 0)
            })
            .await
    }

    // =========================================================================
    // Task Operations
    // =========================================================================

    async fn create_task(&self, task: &TranslationTask) -> Result<()> {
        let task = task.clone();

        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "INSERT INTO translation_tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                     ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
                    TASK_COLUMNS
                );
                conn.execute(
                    &sql,
                    params![
                        task.id,
                        task.video_id,
                        task.target_language,
                        task.status.to_string(),
                        task.resume_stage.map(|s| s.to_string()),
                        task.current_phase,
                        task.total_segments,
                        task.completed_segments,
                        task.current_segment,
                        task.progress_percentage,
                        task.estimated_time_remaining,
                        task.translation_speed,
                        serde_json::to_string(&task.feature_execution_status)?,
                        task.error_message,
                        task.prepared_entries
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        serde_json::to_string(&task.keywords)?,
                        task.result_entries
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        task.quality_score,
                        task.last_heartbeat,
                        task.paused_at,
                        task.started_at,
                        task.completed_at,
                        task.created_at,
                        task.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<TranslationTask>> {
        let task_id = task_id.to_string();

        self.db
            .execute_async(move |conn| {
                let sql = format!("SELECT {} FROM translation_tasks WHERE id = ?1", TASK_COLUMNS);
                let task = conn
                    .query_row(&sql, [task_id], Self::parse_task_row)
                    .optional()?;
                Ok(task)
            })
            .await
    }

    async fn update_task(&self, task: &TranslationTask) -> Result<()> {
        let task = task.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE translation_tasks SET
                        status = ?2, resume_stage = ?3, current_phase = ?4,
                        total_segments = ?5, completed_segments = ?6, current_segment = ?7,
                        progress_percentage = ?8, estimated_time_remaining = ?9,
                        translation_speed = ?10, feature_execution_status = ?11,
                        error_message = ?12, prepared_entries = ?13, keywords = ?14,
                        result_entries = ?15, quality_score = ?16, last_heartbeat = ?17,
                        paused_at = ?18, started_at = ?19, completed_at = ?20, updated_at = ?21
                    WHERE id = ?1
                    "#,
                    params![
                        task.id,
                        task.status.to_string(),
                        task.resume_stage.map(|s| s.to_string()),
                        task.current_phase,
                        task.total_segments,
                        task.completed_segments,
                        task.current_segment,
                        task.progress_percentage,
                        task.estimated_time_remaining,
                        task.translation_speed,
                        serde_json::to_string(&task.feature_execution_status)?,
                        task.error_message,
                        task.prepared_entries
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        serde_json::to_string(&task.keywords)?,
                        task.result_entries
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        task.quality_score,
                        task.last_heartbeat,
                        task.paused_at,
                        task.started_at,
                        task.completed_at,
                        task.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<TranslationTask>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let statuses: Vec<String> = statuses.iter().map(|s| s.to_string()).collect();

        self.db
            .execute_async(move |conn| {
                let placeholders = vec!["?"; statuses.len()].join(", ");
                let sql = format!(
                    "SELECT {} FROM translation_tasks WHERE status IN ({}) ORDER BY created_at ASC",
                    TASK_COLUMNS, placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let tasks = stmt
                    .query_map(params_from_iter(statuses.iter()), Self::parse_task_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tasks)
            })
            .await
    }

    async fn delete_task(&self, task_id: &str) -> Result<bool> {
        let task_id = task_id.to_string();

        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute("DELETE FROM translation_tasks WHERE id = ?1", [&task_id])?;
                Ok(deleted > 0)
            })
            .await
    }

    // =========================================================================
    // Segment Task Operations
    // =========================================================================

    async fn replace_segment_tasks(&self, task_id: &str, segments: &[SegmentTask]) -> Result<()> {
        let task_id = task_id.to_string();
        let segments = segments.to_vec();

        self.db
            .transaction_async(move |tx| {
                tx.execute("DELETE FROM segment_tasks WHERE task_id = ?1", [&task_id])?;

                let sql = format!(
                    "INSERT INTO segment_tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, \
                     ?10, ?11, ?12, ?13, ?14, ?15)",
                    SEGMENT_COLUMNS
                );
                let mut stmt = tx.prepare(&sql)?;
                for segment in &segments {
                    stmt.execute(params![
                        segment.task_id,
                        segment.segment_index,
                        segment.start_index,
                        segment.end_index,
                        segment.status.to_string(),
                        segment.subtitle_count,
                        segment.character_count,
                        segment.estimated_tokens,
                        segment.processing_time_ms,
                        segment.retry_count,
                        segment.error_message,
                        segment
                            .partial_result
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        serde_json::to_string(&segment.flagged_entries)?,
                        segment.created_at,
                        segment.updated_at,
                    ])?;
                }

                debug!("Stored {} segment tasks for task {}", segments.len(), task_id);
                Ok(())
            })
            .await
    }

    async fn list_segment_tasks(&self, task_id: &str) -> Result<Vec<SegmentTask>> {
        let task_id = task_id.to_string();

        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM segment_tasks WHERE task_id = ?1 ORDER BY segment_index ASC",
                    SEGMENT_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let segments = stmt
                    .query_map([task_id], Self::parse_segment_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(segments)
            })
            .await
    }

    async fn update_segment_task(&self, segment: &SegmentTask) -> Result<()> {
        let segment = segment.clone();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    r#"
                    UPDATE segment_tasks SET
                        status = ?3, processing_time_ms = ?4, retry_count = ?5,
                        error_message = ?6, partial_result = ?7, flagged_entries = ?8,
                        updated_at = ?9
                    WHERE task_id = ?1 AND segment_index = ?2
                    "#,
                    params![
                        segment.task_id,
                        segment.segment_index,
                        segment.status.to_string(),
                        segment.processing_time_ms,
                        segment.retry_count,
                        segment.error_message,
                        segment
                            .partial_result
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        serde_json::to_string(&segment.flagged_entries)?,
                        now_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    // =========================================================================
    // Cache Operations
    // =========================================================================

    async fn get_cache_entry(&self, video_id: &str, target_language: &str) -> Result<Option<CacheEntry>> {
        let video_id = video_id.to_string();
        let target_language = target_language.to_string();

        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    "SELECT {} FROM translated_subtitles WHERE video_id = ?1 AND target_language = ?2",
                    CACHE_COLUMNS
                );
                let entry = conn
                    .query_row(&sql, params![video_id, target_language], Self::parse_cache_row)
                    .optional()?;
                Ok(entry)
            })
            .await
    }

    async fn upsert_cache_entry(&self, entry: &CacheEntry) -> Result<()> {
        let entry = entry.clone();

        self.db
            .execute_async(move |conn| {
                let sql = format!(
                    r#"
                    INSERT INTO translated_subtitles ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(video_id, target_language) DO UPDATE SET
                        source_fingerprint = excluded.source_fingerprint,
                        config_fingerprint = excluded.config_fingerprint,
                        entries = excluded.entries,
                        model_id = excluded.model_id,
                        config_snapshot = excluded.config_snapshot,
                        updated_at = excluded.updated_at
                    "#,
                    CACHE_COLUMNS
                );
                conn.execute(
                    &sql,
                    params![
                        entry.video_id,
                        entry.target_language,
                        entry.source_fingerprint,
                        entry.config_fingerprint,
                        serde_json::to_string(&entry.entries)?,
                        entry.model_id,
                        entry.config_snapshot,
                        entry.access_count,
                        entry.last_accessed_at,
                        entry.created_at,
                        entry.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn record_cache_hit(&self, video_id: &str, target_language: &str) -> Result<()> {
        let video_id = video_id.to_string();
        let target_language = target_language.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "UPDATE translated_subtitles
                     SET access_count = access_count + 1, last_accessed_at = ?3
                     WHERE video_id = ?1 AND target_language = ?2",
                    params![video_id, target_language, now_rfc3339()],
                )?;
                Ok(())
            })
            .await
    }

    async fn purge_cache_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339();

        self.db
            .execute_async(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM translated_subtitles WHERE updated_at < ?1",
                    [cutoff],
                )?;
                Ok(deleted)
            })
            .await
    }

    // =========================================================================
    // Notification Operations
    // =========================================================================

    async fn add_notification(&self, task_id: &str, kind: NotificationKind, message: &str) -> Result<i64> {
        let task_id = task_id.to_string();
        let message = message.to_string();

        self.db
            .execute_async(move |conn| {
                conn.execute(
                    "INSERT INTO task_notifications (task_id, kind, message, is_read, created_at)
                     VALUES (?1, ?2, ?3, 0, ?4)",
                    params![task_id, kind.to_string(), message, now_rfc3339()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn list_notifications(&self, task_id: &str) -> Result<Vec<TaskNotification>> {
        let task_id = task_id.to_string();

        self.db
            .execute_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, kind, message, is_read, created_at
                     FROM task_notifications WHERE task_id = ?1 ORDER BY id ASC",
                )?;
                let notifications = stmt
                    .query_map([task_id], Self::parse_notification_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(notifications)
            })
            .await
    }

    async fn set_notification_read(&self, notification_id: i64, read: bool) -> Result<bool> {
        self.db
            .execute_async(move |conn| {
                let updated = conn.execute(
                    "UPDATE task_notifications SET is_read = ?2 WHERE id = ?1",
                    params![notification_id, read as i64],
                )?;
                Ok(updated > 0)
            })
            .await
    }
}

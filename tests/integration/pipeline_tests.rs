/*!
 * End-to-end tests for task execution
 */

use subflow::database::{NotificationKind, SegmentStatus, TaskStatus, TranslationTask};
use subflow::providers::RequestKind;
use subflow::providers::mock::MockProvider;
use subflow::{OrchestratorError, TaskStore};
use tokio::sync::broadcast::error::RecvError;

use crate::common::{Harness, sample_entries, test_config};

#[tokio::test]
async fn test_run_withTwoMinutesOfDialogue_shouldCompleteWithFullTrack() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let entries = sample_entries(45, 120.0);
    let task_id = harness.submit(entries.clone()).await;

    let task = harness.orchestrator.run(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress_percentage, 100.0);
    assert!((2..=3).contains(&task.total_segments), "{} segments", task.total_segments);
    assert_eq!(task.completed_segments, task.total_segments);
    assert!(task.completed_at.is_some());

    let result = harness.orchestrator.result(&task_id).await.unwrap().unwrap();
    assert!(!result.is_empty() && result.len() <= entries.len());
    assert_eq!(result.first().unwrap().start, entries.first().unwrap().start);
    assert_eq!(result.last().unwrap().end, entries.last().unwrap().end);
    assert!(result.iter().all(|e| e.text.starts_with("[tr] ")));

    let segments = harness.repo.list_segment_tasks(&task_id).await.unwrap();
    assert_eq!(segments.len() as i64, task.total_segments);
    assert!(segments.iter().all(|s| s.status == SegmentStatus::Completed));
    assert_eq!(harness.provider.calls_for(RequestKind::Translate), segments.len());

    let quality = task.quality_score.unwrap();
    assert!((0.0..=1.0).contains(&quality));
    assert!(task.feature_execution_status.translation.is_completed());
}

#[tokio::test]
async fn test_run_shouldPublishMonotonicProgress() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let task_id = harness.submit(sample_entries(45, 120.0)).await;

    let mut events = harness.orchestrator.subscribe(&task_id);
    let handle = harness.orchestrator.start(&task_id).unwrap();

    let mut received = Vec::new();
    loop {
        match events.recv().await {
            Ok(event) => received.push(event),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    handle.await.unwrap().unwrap();

    assert!(received.len() >= 5);
    for pair in received.windows(2) {
        assert!(pair[0].progress <= pair[1].progress, "{} > {}", pair[0].progress, pair[1].progress);
    }
    let last = received.last().unwrap();
    assert_eq!(last.status, TaskStatus::Completed);
    assert_eq!(last.progress, 100.0);
    assert!(received.iter().any(|e| e.status == TaskStatus::Translating));
}

#[tokio::test]
async fn test_run_twiceForSameSource_shouldServeSecondFromCache() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let video = harness.add_video(sample_entries(45, 120.0)).await;

    let first = harness.orchestrator.submit(&video.id, "fr").await.unwrap();
    harness.orchestrator.run(&first.id).await.unwrap();
    let calls = harness.provider.request_count();

    let second = harness.orchestrator.submit(&video.id, "fr").await.unwrap();
    let task = harness.orchestrator.run(&second.id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(harness.provider.request_count(), calls);
    assert_eq!(
        harness.orchestrator.result(&second.id).await.unwrap(),
        harness.orchestrator.result(&first.id).await.unwrap()
    );
    assert_eq!(harness.orchestrator.cache_stats().hits, 1);
}

#[tokio::test]
async fn test_databaseStats_afterRun_shouldCountStoredRows() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let task_id = harness.submit(sample_entries(45, 120.0)).await;
    let task = harness.orchestrator.run(&task_id).await.unwrap();

    let stats = harness.repo.connection().stats().unwrap();
    assert_eq!(stats.video_count, 1);
    assert_eq!(stats.task_count, 1);
    assert_eq!(stats.segment_count, task.total_segments);
    assert_eq!(stats.cache_count, 1);
    assert_eq!(stats.file_size_bytes, 0);
}

#[tokio::test]
async fn test_run_withCacheDisabled_shouldTranslateAgain() {
    let mut config = test_config();
    config.cache.enabled = false;
    let harness = Harness::new(MockProvider::working(), config);
    let video = harness.add_video(sample_entries(30, 80.0)).await;

    let first = harness.orchestrator.submit(&video.id, "fr").await.unwrap();
    harness.orchestrator.run(&first.id).await.unwrap();
    let calls = harness.provider.request_count();

    let second = harness.orchestrator.submit(&video.id, "fr").await.unwrap();
    harness.orchestrator.run(&second.id).await.unwrap();
    assert_eq!(harness.provider.request_count(), calls * 2);
}

#[tokio::test]
async fn test_run_withFailingService_shouldStopAfterExactRetryBound() {
    let mut config = test_config();
    config.execution.max_retries = 3;
    let harness = Harness::new(MockProvider::failing(), config);
    let task_id = harness.submit(sample_entries(20, 60.0)).await;

    let task = harness.orchestrator.run(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("Segment 0 failed"));
    assert_eq!(harness.provider.calls_for(RequestKind::Translate), 3);

    let segments = harness.repo.list_segment_tasks(&task_id).await.unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].status, SegmentStatus::Failed);
    assert_eq!(segments[0].retry_count, 2);

    let notifications = harness.orchestrator.notifications(&task_id).await.unwrap();
    assert!(notifications.iter().any(|n| n.kind == NotificationKind::Failed));
}

#[tokio::test]
async fn test_run_withoutTranscript_shouldFail() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let video = harness
        .orchestrator
        .register_video("Silent film", "en", "memory://silent")
        .await
        .unwrap();
    let task = harness.orchestrator.submit(&video.id, "de").await.unwrap();

    let task = harness.orchestrator.run(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("No transcript"));
    assert_eq!(harness.provider.request_count(), 0);
}

#[tokio::test]
async fn test_run_withMissingVideo_shouldFail() {
    let harness = Harness::new(MockProvider::working(), test_config());
    harness
        .repo
        .connection()
        .execute(|conn| {
            conn.execute_batch("PRAGMA foreign_keys=OFF;")?;
            Ok(())
        })
        .unwrap();
    let orphan = TranslationTask::new("no-such-video", "fr");
    harness.repo.create_task(&orphan).await.unwrap();

    let task = harness.orchestrator.run(&orphan.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("Video not found"));
    assert!(!harness.orchestrator.is_running(&orphan.id));
}

#[tokio::test]
async fn test_submit_shouldValidateInputs() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let video = harness.add_video(sample_entries(10, 30.0)).await;

    assert!(matches!(
        harness.orchestrator.submit("missing", "fr").await,
        Err(OrchestratorError::VideoNotFound(_))
    ));
    assert!(matches!(
        harness.orchestrator.submit(&video.id, "klingon").await,
        Err(OrchestratorError::InvalidLanguage(_))
    ));

    let task = harness.orchestrator.submit(&video.id, "fre").await.unwrap();
    assert_eq!(task.target_language, "fr");
    assert_eq!(task.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_run_withEnhancementsEnabled_shouldRecordEveryStage() {
    let mut config = test_config();
    config.enhancement.text_correction = true;
    config.enhancement.pre_stitch = true;
    config.enhancement.style_adjustment = true;
    let harness = Harness::new(MockProvider::working(), config);
    let task_id = harness.submit(sample_entries(30, 90.0)).await;

    let task = harness.orchestrator.run(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let status = &task.feature_execution_status;
    assert!(status.keyword_extraction.is_completed());
    assert!(status.text_correction.is_completed());
    assert!(status.pre_stitch.is_completed());
    assert!(status.translation.is_completed());
    assert!(status.style_adjustment.is_completed());
    assert!(status.post_stitch.is_completed());
    assert!(status.failed_features().is_empty());

    assert!(harness.provider.calls_for(RequestKind::Correct) >= 1);
    assert!(harness.provider.calls_for(RequestKind::StyleAdjust) >= 1);
    assert!(task.quality_score.is_some());
}

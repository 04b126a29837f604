/*!
 * Tests for recovery of abandoned tasks
 */

use subflow::TaskStore;
use subflow::database::{SegmentStatus, TaskStatus};
use subflow::providers::RequestKind;
use subflow::providers::mock::MockProvider;

use crate::common::{Harness, sample_entries, test_config};

fn minutes_ago(minutes: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::minutes(minutes)).to_rfc3339()
}

#[tokio::test]
async fn test_recoverStaleTasks_withOldHeartbeat_shouldRunTask() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let task_id = harness.submit(sample_entries(30, 80.0)).await;

    let mut task = harness.repo.get_task(&task_id).await.unwrap().unwrap();
    task.last_heartbeat = minutes_ago(10);
    harness.repo.update_task(&task).await.unwrap();

    let started = harness.orchestrator.recover_stale_tasks().await.unwrap();
    assert_eq!(started.len(), 1);

    let (recovered_id, handle) = started.into_iter().next().unwrap();
    assert_eq!(recovered_id, task_id);
    let task = handle.await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_recoverStaleTasks_withFreshHeartbeat_shouldLeaveTaskAlone() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let task_id = harness.submit(sample_entries(30, 80.0)).await;

    let started = harness.orchestrator.recover_stale_tasks().await.unwrap();
    assert!(started.is_empty());
    assert_eq!(
        harness.orchestrator.status(&task_id).await.unwrap().status,
        TaskStatus::Queued
    );
}

#[tokio::test]
async fn test_recoverStaleTasks_shouldIgnoreSuspendedTasks() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let task_id = harness.submit(sample_entries(30, 80.0)).await;

    let mut task = harness.repo.get_task(&task_id).await.unwrap().unwrap();
    task.transition(TaskStatus::Paused);
    task.last_heartbeat = minutes_ago(30);
    harness.repo.update_task(&task).await.unwrap();

    assert!(harness.orchestrator.recover_stale_tasks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recoverStaleTasks_afterCrashMidTranslation_shouldFinishRemainingSegments() {
    let mut entries = sample_entries(45, 120.0);
    entries[2].text = "The lighthouse keeper waves at the ferry.".to_string();

    // First process: the segment holding the marker never succeeds
    let crashed = Harness::new(MockProvider::fail_on("lighthouse"), test_config());
    let task_id = crashed.submit(entries).await;
    crashed.orchestrator.run(&task_id).await.unwrap();

    // Rewind to what a crash during translation leaves behind
    let mut task = crashed.repo.get_task(&task_id).await.unwrap().unwrap();
    task.transition(TaskStatus::Translating);
    task.error_message = None;
    task.last_heartbeat = minutes_ago(5);
    crashed.repo.update_task(&task).await.unwrap();

    let mut segments = crashed.repo.list_segment_tasks(&task_id).await.unwrap();
    let in_flight = segments
        .iter_mut()
        .find(|s| s.status == SegmentStatus::Failed)
        .unwrap();
    in_flight.status = SegmentStatus::Translating;
    crashed.repo.update_segment_task(in_flight).await.unwrap();
    let unfinished = segments
        .iter()
        .filter(|s| s.status != SegmentStatus::Completed)
        .count();

    // Second process picks it up
    let restarted = Harness::with_store(
        crashed.repo.clone(),
        crashed.source.clone(),
        MockProvider::working(),
        test_config(),
    );
    let started = restarted.orchestrator.recover_stale_tasks().await.unwrap();
    assert_eq!(started.len(), 1);

    let task = started.into_iter().next().unwrap().1.await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(restarted.provider.calls_for(RequestKind::Translate), unfinished);

    let segments = restarted.repo.list_segment_tasks(&task_id).await.unwrap();
    assert!(segments.iter().all(|s| s.status == SegmentStatus::Completed));
}

#[tokio::test]
async fn test_recoverStaleTasks_afterCrashInStitching_shouldReuseTranslations() {
    let mut config = test_config();
    config.cache.enabled = false;

    let crashed = Harness::new(MockProvider::working(), config.clone());
    let task_id = crashed.submit(sample_entries(45, 120.0)).await;
    crashed.orchestrator.run(&task_id).await.unwrap();
    let uninterrupted = crashed.orchestrator.result(&task_id).await.unwrap().unwrap();

    // What a crash right after the last segment leaves behind
    let mut task = crashed.repo.get_task(&task_id).await.unwrap().unwrap();
    task.transition(TaskStatus::Stitching);
    task.result_entries = None;
    task.completed_at = None;
    task.quality_score = None;
    task.last_heartbeat = minutes_ago(5);
    crashed.repo.update_task(&task).await.unwrap();

    let restarted = Harness::with_store(
        crashed.repo.clone(),
        crashed.source.clone(),
        MockProvider::working(),
        config,
    );
    let started = restarted.orchestrator.recover_stale_tasks().await.unwrap();
    assert_eq!(started.len(), 1);

    let task = started.into_iter().next().unwrap().1.await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(restarted.provider.calls_for(RequestKind::Translate), 0);
    assert_eq!(
        restarted.orchestrator.result(&task_id).await.unwrap(),
        Some(uninterrupted)
    );
}

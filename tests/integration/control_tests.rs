/*!
 * Tests for administrative control of tasks
 */

use std::time::Duration;

use subflow::database::{NotificationKind, SegmentStatus, TaskStatus};
use subflow::providers::RequestKind;
use subflow::providers::mock::MockProvider;
use subflow::{AdminAction, OrchestratorError, ProgressEvent, SubtitleEntry, TaskOrchestrator, TaskStore};
use tokio::sync::broadcast;

use crate::common::{Harness, sample_entries, test_config, wait_until_idle};

/// Wait for the event announcing that segments were created
async fn wait_for_translation_start(events: &mut broadcast::Receiver<ProgressEvent>) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if event.status == TaskStatus::Translating => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("task ended before translating"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("translation never started");
}

fn single_worker_config() -> subflow::Config {
    let mut config = test_config();
    config.execution.concurrency = 1;
    config
}

async fn start_and_wait_for_translation(orchestrator: &TaskOrchestrator, task_id: &str) -> subflow::ExecutionHandle {
    let mut events = orchestrator.subscribe(task_id);
    let handle = orchestrator.start(task_id).unwrap();
    wait_for_translation_start(&mut events).await;
    handle
}

#[tokio::test]
async fn test_cancel_whileTranslating_shouldLeaveNoSegmentInFlight() {
    let harness = Harness::new(MockProvider::slow(150), single_worker_config());
    let task_id = harness.submit(sample_entries(100, 260.0)).await;

    let handle = start_and_wait_for_translation(&harness.orchestrator, &task_id).await;
    assert!(harness.orchestrator.control(&task_id, AdminAction::Cancel).await.unwrap());

    let task = handle.await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(!harness.orchestrator.is_running(&task_id));

    let segments = harness.repo.list_segment_tasks(&task_id).await.unwrap();
    assert!(segments.len() > 2);
    assert!(segments.iter().all(|s| matches!(s.status, SegmentStatus::Completed | SegmentStatus::Pending)));
    assert!(segments.iter().any(|s| s.status == SegmentStatus::Pending));
    assert!(harness.provider.request_count() < segments.len());
}

#[tokio::test]
async fn test_pause_thenContinue_shouldTranslateEachSegmentOnce() {
    let harness = Harness::new(MockProvider::slow(100), single_worker_config());
    let task_id = harness.submit(sample_entries(70, 190.0)).await;

    let handle = start_and_wait_for_translation(&harness.orchestrator, &task_id).await;
    assert!(harness.orchestrator.control(&task_id, AdminAction::Pause).await.unwrap());

    let paused = handle.await.unwrap().unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert!(paused.paused_at.is_some());
    assert!(paused.completed_segments < paused.total_segments);
    let notifications = harness.orchestrator.notifications(&task_id).await.unwrap();
    assert!(notifications.iter().any(|n| n.kind == NotificationKind::Paused));

    assert!(harness.orchestrator.control(&task_id, AdminAction::Continue).await.unwrap());
    wait_until_idle(&harness.orchestrator, &task_id).await;

    let task = harness.orchestrator.status(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.paused_at.is_none());
    assert_eq!(harness.provider.calls_for(RequestKind::Translate) as i64, task.total_segments);
}

#[tokio::test]
async fn test_continue_afterFailure_shouldOnlyRetranslateMissingSegments() {
    let mut entries = sample_entries(45, 120.0);
    entries[40] = SubtitleEntry::new(entries[40].start, entries[40].end, "The lighthouse keeper waves at the ferry.");

    let failing = Harness::new(MockProvider::fail_on("lighthouse"), test_config());
    let task_id = failing.submit(entries.clone()).await;
    let task = failing.orchestrator.run(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    let kept = failing.orchestrator.partial_results(&task_id).await.unwrap();
    assert!(kept.len() < task.total_segments as usize);

    // A fresh process over the same store
    let working = Harness::with_store(
        failing.repo.clone(),
        failing.source.clone(),
        MockProvider::working(),
        test_config(),
    );
    let task = working.orchestrator.resume(&task_id).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.error_message.is_none());
    assert_eq!(
        working.provider.calls_for(RequestKind::Translate),
        task.total_segments as usize - kept.len()
    );

    let result = working.orchestrator.result(&task_id).await.unwrap().unwrap();
    assert_eq!(result.len(), 45);
    assert!(result.iter().any(|e| e.text == "[tr] The lighthouse keeper waves at the ferry."));

    // Same output as a run that never failed
    let reference = Harness::new(MockProvider::working(), test_config());
    let reference_id = reference.submit(entries).await;
    reference.orchestrator.run(&reference_id).await.unwrap();
    assert_eq!(Some(result), reference.orchestrator.result(&reference_id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_duringRetryBackoff_shouldEndCancelledAndContinueCleanly() {
    let mut entries = sample_entries(45, 120.0);
    entries[0] = SubtitleEntry::new(entries[0].start, entries[0].end, "The lighthouse keeper waves at the ferry.");
    let mut config = single_worker_config();
    config.execution.retry_backoff_ms = 300;

    let failing = Harness::new(MockProvider::fail_on("lighthouse"), config);
    let task_id = failing.submit(entries).await;

    let handle = start_and_wait_for_translation(&failing.orchestrator, &task_id).await;
    // First attempt on segment 0 has failed; the executor is now backing off
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(failing.orchestrator.control(&task_id, AdminAction::Cancel).await.unwrap());

    let task = handle.await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.error_message.is_none());
    assert!(failing.provider.calls_for(RequestKind::Translate) < 3);

    let segments = failing.repo.list_segment_tasks(&task_id).await.unwrap();
    assert!(segments.iter().all(|s| matches!(s.status, SegmentStatus::Completed | SegmentStatus::Pending)));
    assert_eq!(segments[0].status, SegmentStatus::Pending);

    let notifications = failing.orchestrator.notifications(&task_id).await.unwrap();
    assert!(notifications.iter().all(|n| n.kind != NotificationKind::Failed));

    let working = Harness::with_store(
        failing.repo.clone(),
        failing.source.clone(),
        MockProvider::working(),
        test_config(),
    );
    let task = working.orchestrator.resume(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let completed_before = segments.iter().filter(|s| s.status == SegmentStatus::Completed).count();
    assert_eq!(
        working.provider.calls_for(RequestKind::Translate),
        task.total_segments as usize - completed_before
    );
}

#[tokio::test]
async fn test_pause_duringRetryBackoff_shouldEndPaused() {
    let mut entries = sample_entries(30, 80.0);
    entries[0] = SubtitleEntry::new(entries[0].start, entries[0].end, "The lighthouse keeper waves at the ferry.");
    let mut config = single_worker_config();
    config.execution.retry_backoff_ms = 300;

    let harness = Harness::new(MockProvider::fail_on("lighthouse"), config);
    let task_id = harness.submit(entries).await;

    let handle = start_and_wait_for_translation(&harness.orchestrator, &task_id).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.orchestrator.control(&task_id, AdminAction::Pause).await.unwrap());

    let task = handle.await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Paused);
    assert!(task.paused_at.is_some());
    assert!(task.feature_execution_status.translation.error.is_none());
}

#[tokio::test]
async fn test_start_whileRunning_shouldReject() {
    let harness = Harness::new(MockProvider::slow(50), test_config());
    let task_id = harness.submit(sample_entries(30, 80.0)).await;

    let handle = harness.orchestrator.start(&task_id).unwrap();
    assert!(matches!(
        harness.orchestrator.start(&task_id),
        Err(OrchestratorError::AlreadyRunning(_))
    ));
    assert!(matches!(
        harness.orchestrator.run(&task_id).await,
        Err(OrchestratorError::AlreadyRunning(_))
    ));
    assert!(!harness.orchestrator.control(&task_id, AdminAction::Restart).await.unwrap());

    let task = handle.await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_restart_afterCompletion_shouldRunFromScratch() {
    let mut config = test_config();
    config.cache.enabled = false;
    let harness = Harness::new(MockProvider::working(), config);
    let task_id = harness.submit(sample_entries(45, 120.0)).await;

    let first = harness.orchestrator.run(&task_id).await.unwrap();
    let first_result = harness.orchestrator.result(&task_id).await.unwrap();

    assert!(harness.orchestrator.control(&task_id, AdminAction::Restart).await.unwrap());
    wait_until_idle(&harness.orchestrator, &task_id).await;

    let task = harness.orchestrator.status(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(
        harness.provider.calls_for(RequestKind::Translate) as i64,
        first.total_segments * 2
    );
    assert_eq!(harness.orchestrator.result(&task_id).await.unwrap(), first_result);
}

#[tokio::test]
async fn test_control_onCompletedTask_shouldOnlyAllowRestartAndDelete() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let task_id = harness.submit(sample_entries(12, 30.0)).await;
    harness.orchestrator.run(&task_id).await.unwrap();

    for action in [AdminAction::Pause, AdminAction::Cancel, AdminAction::Continue] {
        assert!(!harness.orchestrator.control(&task_id, action).await.unwrap(), "{}", action);
    }
    assert_eq!(
        harness.orchestrator.status(&task_id).await.unwrap().status,
        TaskStatus::Completed
    );

    assert!(harness.orchestrator.control(&task_id, AdminAction::Delete).await.unwrap());
    assert!(matches!(
        harness.orchestrator.status(&task_id).await,
        Err(OrchestratorError::TaskNotFound(_))
    ));
    assert!(harness.repo.list_segment_tasks(&task_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_queuedTask_thenContinue_shouldComplete() {
    let harness = Harness::new(MockProvider::working(), test_config());
    let task_id = harness.submit(sample_entries(12, 30.0)).await;

    assert!(harness.orchestrator.control(&task_id, AdminAction::Cancel).await.unwrap());
    assert_eq!(
        harness.orchestrator.status(&task_id).await.unwrap().status,
        TaskStatus::Cancelled
    );

    let task = harness.orchestrator.resume(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_delete_whileRunning_shouldStopAndRemove() {
    let harness = Harness::new(MockProvider::slow(100), single_worker_config());
    let task_id = harness.submit(sample_entries(70, 190.0)).await;

    let _handle = start_and_wait_for_translation(&harness.orchestrator, &task_id).await;
    assert!(harness.orchestrator.control(&task_id, AdminAction::Delete).await.unwrap());

    assert!(!harness.orchestrator.is_running(&task_id));
    assert!(harness.repo.get_task(&task_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_control_withUnknownTask_shouldReportNotFound() {
    let harness = Harness::new(MockProvider::working(), test_config());
    assert!(matches!(
        harness.orchestrator.control("nope", AdminAction::Pause).await,
        Err(OrchestratorError::TaskNotFound(_))
    ));
}

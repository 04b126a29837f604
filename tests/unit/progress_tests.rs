/*!
 * Tests for progress broadcasting
 */

use subflow::{ProgressBroadcaster, ProgressEvent, TaskStatus};

#[test]
fn test_subscribe_thenPublish_shouldDeliverInOrder() {
    let broadcaster = ProgressBroadcaster::new();
    let mut events = broadcaster.subscribe("task-1");

    broadcaster.publish(ProgressEvent::new("task-1", TaskStatus::Segmenting, 5.0, "segments ready"));
    broadcaster.publish(ProgressEvent::new("task-1", TaskStatus::Translating, 40.0, "2/5 segments"));

    let received = tokio_test::block_on(async {
        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        (first, second)
    });

    assert_eq!(received.0.status, TaskStatus::Segmenting);
    assert_eq!(received.1.progress, 40.0);
    assert_eq!(received.1.message, "2/5 segments");
}

#[test]
fn test_close_shouldEndOpenSubscriptions() {
    let broadcaster = ProgressBroadcaster::new();
    let mut events = broadcaster.subscribe("task-2");
    assert_eq!(broadcaster.subscriber_count("task-2"), 1);

    broadcaster.close("task-2");

    let result = tokio_test::block_on(async { events.recv().await });
    assert!(result.is_err());
    assert_eq!(broadcaster.subscriber_count("task-2"), 0);
}

#[test]
fn test_publish_toOtherTask_shouldNotLeak() {
    let broadcaster = ProgressBroadcaster::new();
    let mut events = broadcaster.subscribe("task-a");

    assert_eq!(
        broadcaster.publish(ProgressEvent::new("task-b", TaskStatus::Translating, 10.0, "other")),
        0
    );
    assert!(events.try_recv().is_err());
}

#[test]
fn test_progressEvent_shouldClampPercentage() {
    let event = ProgressEvent::new("task-3", TaskStatus::Completed, 130.0, "done");
    assert_eq!(event.progress, 100.0);
    assert!(!event.stage.is_empty());
}

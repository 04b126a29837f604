/*!
 * Progress broadcasting.
 *
 * Each task gets its own `tokio::sync::broadcast` channel. Subscribers only
 * see events published after they subscribed; a lagging or missing
 * subscriber never blocks or fails the publisher. A channel is dropped as
 * soon as its last receiver is gone.
 */

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::database::TaskStatus;
use crate::database::models::now_rfc3339;

/// Events buffered per task before slow receivers start lagging
const CHANNEL_CAPACITY: usize = 128;

/// One progress update of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    /// Human-readable phase label
    pub stage: String,
    pub status: TaskStatus,
    /// Overall progress, 0 to 100
    pub progress: f64,
    pub message: String,
    pub timestamp: String,
}

impl ProgressEvent {
    pub fn new(task_id: &str, status: TaskStatus, progress: f64, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            stage: status.phase_label().to_string(),
            status,
            progress: progress.clamp(0.0, 100.0),
            message: message.into(),
            timestamp: now_rfc3339(),
        }
    }
}

/// Per-task fan-out of progress events
#[derive(Debug, Clone, Default)]
pub struct ProgressBroadcaster {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive future events of `task_id`
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.lock();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Deliver an event; returns the number of receivers that got it
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let mut channels = self.channels.lock();
        let Some(sender) = channels.get(&event.task_id) else {
            return 0;
        };
        if sender.receiver_count() == 0 {
            channels.remove(&event.task_id);
            return 0;
        }
        sender.send(event).unwrap_or(0)
    }

    /// Drop the channel of a task; open receivers see it closed
    pub fn close(&self, task_id: &str) {
        self.channels.lock().remove(task_id);
    }

    /// Number of tasks holding a channel
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Number of live receivers for a task
    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.channels
            .lock()
            .get(task_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_withoutSubscribers_shouldDeliverToNobody() {
        let broadcaster = ProgressBroadcaster::new();
        let delivered = broadcaster.publish(ProgressEvent::new("t1", TaskStatus::Translating, 50.0, "half"));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_subscribe_shouldOnlySeeFutureEvents() {
        let broadcaster = ProgressBroadcaster::new();
        let mut early = broadcaster.subscribe("t1");
        broadcaster.publish(ProgressEvent::new("t1", TaskStatus::Segmenting, 5.0, "first"));

        let mut late = broadcaster.subscribe("t1");
        let delivered = broadcaster.publish(ProgressEvent::new("t1", TaskStatus::Translating, 20.0, "second"));
        assert_eq!(delivered, 2);

        assert_eq!(early.recv().await.unwrap().message, "first");
        assert_eq!(early.recv().await.unwrap().message, "second");
        assert_eq!(late.recv().await.unwrap().message, "second");
    }

    #[tokio::test]
    async fn test_publish_shouldIsolateTasks() {
        let broadcaster = ProgressBroadcaster::new();
        let mut other = broadcaster.subscribe("t2");
        broadcaster.subscribe("t1");

        broadcaster.publish(ProgressEvent::new("t1", TaskStatus::Translating, 10.0, "t1 only"));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_shouldEndSubscriptions() {
        let broadcaster = ProgressBroadcaster::new();
        let mut rx = broadcaster.subscribe("t1");
        broadcaster.close("t1");

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(broadcaster.subscriber_count("t1"), 0);
    }

    #[tokio::test]
    async fn test_droppedSubscriber_shouldReleaseChannel() {
        let broadcaster = ProgressBroadcaster::new();
        let abandoned = broadcaster.subscribe("done-task");
        drop(abandoned);
        assert_eq!(broadcaster.channel_count(), 1);

        assert_eq!(
            broadcaster.publish(ProgressEvent::new("done-task", TaskStatus::Completed, 100.0, "late")),
            0
        );
        assert_eq!(broadcaster.channel_count(), 0);

        drop(broadcaster.subscribe("old-task"));
        let _live = broadcaster.subscribe("live-task");
        assert_eq!(broadcaster.channel_count(), 1);
        assert_eq!(broadcaster.subscriber_count("live-task"), 1);
    }

    #[test]
    fn test_progressEvent_shouldClampProgress() {
        let event = ProgressEvent::new("t1", TaskStatus::Completed, 130.0, "done");
        assert_eq!(event.progress, 100.0);
        assert_eq!(event.stage, TaskStatus::Completed.phase_label());
    }
}

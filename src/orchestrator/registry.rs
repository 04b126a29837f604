/*!
 * In-memory registry of running task executions.
 *
 * At most one execution per task may exist in a process. Registering
 * returns a guard that removes the entry when dropped, so the entry goes
 * away however the execution ends.
 */

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::translation::executor::StopRequest;

/// Cooperative stop request observed at dispatch boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Pause,
    Cancel,
}

/// Flags an operator sets on a running execution
#[derive(Debug, Default)]
pub struct ExecutionControl {
    pause: AtomicBool,
    cancel: AtomicBool,
}

impl ExecutionControl {
    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Pending stop request; cancellation wins over pause
    pub fn signal(&self) -> Option<ControlSignal> {
        if self.cancel.load(Ordering::SeqCst) {
            Some(ControlSignal::Cancel)
        } else if self.pause.load(Ordering::SeqCst) {
            Some(ControlSignal::Pause)
        } else {
            None
        }
    }
}

impl StopRequest for ExecutionControl {
    fn is_requested(&self) -> bool {
        self.signal().is_some()
    }
}

/// Task id to control flags of the live execution
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    entries: Arc<Mutex<HashMap<String, Arc<ExecutionControl>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an execution; `None` if the task already has one
    pub fn register(&self, task_id: &str) -> Option<RegistrationGuard> {
        let mut entries = self.entries.lock();
        if entries.contains_key(task_id) {
            return None;
        }

        let control = Arc::new(ExecutionControl::default());
        entries.insert(task_id.to_string(), control.clone());

        Some(RegistrationGuard {
            registry: self.clone(),
            task_id: task_id.to_string(),
            control,
        })
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<ExecutionControl>> {
        self.entries.lock().get(task_id).cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries.lock().contains_key(task_id)
    }

    /// Ids of tasks with a live execution
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn remove(&self, task_id: &str) {
        self.entries.lock().remove(task_id);
    }
}

/// Keeps a registry entry alive for the duration of an execution
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: TaskRegistry,
    task_id: String,
    control: Arc<ExecutionControl>,
}

impl RegistrationGuard {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn control(&self) -> Arc<ExecutionControl> {
        self.control.clone()
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.task_id);
    }
}

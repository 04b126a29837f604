/*!
 * Recovery of abandoned tasks.
 *
 * A task whose status is active but which has no live execution in this
 * process and whose heartbeat is older than the configured threshold was
 * left behind by a crash or restart. Recovery starts a new execution for
 * it; the stage engine resumes from whatever the store holds.
 */

use std::time::Duration;

use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::database::TaskStatus;
use crate::errors::OrchestratorResult;

use super::{ExecutionHandle, TaskOrchestrator};

impl TaskOrchestrator {
    /// Start executions for active tasks with a stale heartbeat
    pub async fn recover_stale_tasks(&self) -> OrchestratorResult<Vec<(String, ExecutionHandle)>> {
        let stale_after = self.inner.config.recovery.heartbeat_stale_secs;
        let tasks = self.inner.store.list_tasks_by_status(&TaskStatus::ACTIVE).await?;

        let mut started = Vec::new();
        for task in tasks {
            if self.is_running(&task.id) {
                continue;
            }

            let stale = match task.heartbeat_age_secs() {
                Some(age) => age >= stale_after,
                None => true,
            };
            if !stale {
                continue;
            }

            info!(
                "Recovering task {} abandoned while {} (heartbeat {})",
                task.id, task.status, task.last_heartbeat
            );
            match self.start(&task.id) {
                Ok(handle) => started.push((task.id, handle)),
                // Another sweep or caller got there first
                Err(e) => warn!("Could not recover task {}: {}", task.id, e),
            }
        }

        Ok(started)
    }

    /// Sweep for stale tasks periodically, starting immediately
    pub fn spawn_recovery_loop(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let every = Duration::from_secs(self.inner.config.recovery.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match orchestrator.recover_stale_tasks().await {
                    Ok(started) if !started.is_empty() => {
                        info!("Recovery sweep restarted {} tasks", started.len());
                    }
                    Ok(_) => {}
                    Err(e) => error!("Recovery sweep failed: {}", e),
                }
            }
        })
    }
}

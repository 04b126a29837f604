/*!
 * Bounded worker pool for segment execution.
 *
 * A dispatcher feeds segment jobs into a bounded `mpsc` channel that N
 * workers consume. Each worker reports an outcome per executed job on an
 * unbounded results channel. Before executing a job a worker checks the
 * task's control flags and the pool's halt flag; jobs picked up after a
 * stop request are left untouched (still `pending` in the store).
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use log::{debug, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::database::SegmentTask;
use crate::errors::SegmentError;
use crate::translation::executor::{SegmentExecutor, SegmentOutput};
use crate::translation::segmentation::Segment;

use super::registry::ExecutionControl;

/// One segment waiting for execution
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub segment: Segment,
    pub record: SegmentTask,
}

/// What happened to a job a worker executed
#[derive(Debug)]
pub struct SegmentOutcome {
    /// Record as left by the executor
    pub record: SegmentTask,
    pub result: Result<SegmentOutput, SegmentError>,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    queue_capacity: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize, queue_capacity: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Start dispatching `jobs`
    ///
    /// Returns the outcome stream, which ends once every worker exited, and
    /// a handle that resolves when the dispatcher and all workers finished.
    pub fn spawn(
        &self,
        executor: SegmentExecutor,
        jobs: Vec<SegmentJob>,
        control: Arc<ExecutionControl>,
        halt: Arc<AtomicBool>,
    ) -> (mpsc::UnboundedReceiver<SegmentOutcome>, JoinHandle<()>) {
        let (job_tx, job_rx) = mpsc::channel::<SegmentJob>(self.queue_capacity);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let dispatcher = {
            let control = control.clone();
            let halt = halt.clone();
            tokio::spawn(async move {
                for job in jobs {
                    if halt.load(Ordering::SeqCst) || control.signal().is_some() {
                        debug!("Dispatch stopped before segment {}", job.segment.index);
                        break;
                    }
                    if job_tx.send(job).await.is_err() {
                        break;
                    }
                }
            })
        };

        let workers: Vec<JoinHandle<()>> = (0..self.concurrency)
            .map(|worker_id| {
                let job_rx = job_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let executor = executor.clone();
                let control = control.clone();
                let halt = halt.clone();

                tokio::spawn(async move {
                    loop {
                        let job = {
                            let mut rx = job_rx.lock().await;
                            rx.recv().await
                        };
                        let Some(SegmentJob { segment, mut record }) = job else {
                            break;
                        };

                        if halt.load(Ordering::SeqCst) || control.signal().is_some() {
                            debug!("Worker {} skipping segment {}", worker_id, segment.index);
                            continue;
                        }

                        debug!("Worker {} executing segment {}", worker_id, segment.index);
                        let result = executor.execute(&segment, &mut record).await;
                        if outcome_tx.send(SegmentOutcome { record, result }).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        // Workers hold the only remaining senders
        drop(outcome_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = dispatcher.await {
                warn!("Segment dispatcher panicked: {}", e);
            }
            for result in join_all(workers).await {
                if let Err(e) = result {
                    warn!("Segment worker panicked: {}", e);
                }
            }
        });

        (outcome_rx, handle)
    }
}

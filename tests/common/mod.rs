/*!
 * Common test utilities for the subflow test suite
 */

use std::sync::Arc;
use std::time::Duration;

use subflow::database::VideoRecord;
use subflow::providers::mock::MockProvider;
use subflow::{Config, Repository, StaticSource, SubtitleEntry, TaskOrchestrator};

const SUBJECTS: [&str; 9] = [
    "The captain",
    "My neighbour",
    "A tired engineer",
    "Our guide",
    "The old fisherman",
    "Her younger brother",
    "The night nurse",
    "A quiet student",
    "The mayor",
];

const PREDICATES: [&str; 5] = [
    "checks the harbour lights before dawn.",
    "forgot the keys on the kitchen table.",
    "sings loudly while repairing bicycles.",
    "writes letters to distant cousins every winter.",
    "refuses to board the crowded ferry.",
];

/// Configuration tuned for fast tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.execution.retry_backoff_ms = 1;
    config
}

/// `count` complete sentences spread evenly over `span_secs`
///
/// Neighbouring entries never share subject or predicate, so the merge
/// stage has nothing to deduplicate or join.
pub fn sample_entries(count: usize, span_secs: f64) -> Vec<SubtitleEntry> {
    let step = span_secs / count as f64;
    (0..count)
        .map(|i| {
            let start = i as f64 * step;
            let text = format!("{} {}", SUBJECTS[i % SUBJECTS.len()], PREDICATES[i % PREDICATES.len()]);
            SubtitleEntry::new(start, start + step * 0.75, text)
        })
        .collect()
}

/// Orchestrator wired to in-memory collaborators
pub struct Harness {
    pub orchestrator: TaskOrchestrator,
    pub repo: Repository,
    pub source: StaticSource,
    pub provider: MockProvider,
}

impl Harness {
    pub fn new(provider: MockProvider, config: Config) -> Self {
        let repo = Repository::new_in_memory().expect("in-memory database");
        Self::with_store(repo, StaticSource::new(), provider, config)
    }

    /// Build over existing state, as a restarted process would
    pub fn with_store(repo: Repository, source: StaticSource, provider: MockProvider, config: Config) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let orchestrator = TaskOrchestrator::new(
            config,
            Arc::new(repo.clone()),
            Arc::new(source.clone()),
            Arc::new(provider.clone()),
        );
        Self {
            orchestrator,
            repo,
            source,
            provider,
        }
    }

    /// Register a video serving `entries`
    pub async fn add_video(&self, entries: Vec<SubtitleEntry>) -> VideoRecord {
        let video = self
            .orchestrator
            .register_video("Harbour documentary", "en", "memory://harbour")
            .await
            .expect("register video");
        self.source.insert(&video.id, entries);
        video
    }

    /// Register a video and submit a French translation task
    pub async fn submit(&self, entries: Vec<SubtitleEntry>) -> String {
        let video = self.add_video(entries).await;
        self.orchestrator
            .submit(&video.id, "fr")
            .await
            .expect("submit task")
            .id
    }
}

/// Wait until the task has no live execution
pub async fn wait_until_idle(orchestrator: &TaskOrchestrator, task_id: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while orchestrator.is_running(task_id) {
        assert!(tokio::time::Instant::now() < deadline, "task {} never stopped", task_id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/*!
 * Mock completion service for testing.
 *
 * This module provides a mock backend that simulates different behaviors:
 * - `MockProvider::working()` - Always answers with one entry per input entry
 * - `MockProvider::intermittent(n)` - Fails every n-th request
 * - `MockProvider::failing()` - Always fails with an error
 * - `MockProvider::fail_on(marker)` - Fails translation of any batch containing `marker`
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::errors::ProviderError;
use crate::providers::{CompletionRequest, CompletionService, RequestKind};
use crate::subtitle::SubtitleEntry;

/// Behavior mode for the mock provider
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a well formed payload
    Working,
    /// Fails intermittently (every Nth request)
    Intermittent { fail_every: usize },
    /// Always fails with an error
    Failing,
    /// Fails translation requests whose entries contain the marker
    FailOn { marker: String },
    /// Wraps the payload in prose and a code fence with a trailing comma
    Messy,
    /// Returns one entry fewer than requested
    DropsEntry,
    /// Returns an empty response
    Empty,
    /// Simulates slow responses
    Slow { delay_ms: u64 },
}

/// Mock completion service
#[derive(Debug, Clone)]
pub struct MockProvider {
    /// Behavior mode
    behavior: MockBehavior,
    /// Number of requests received
    request_count: Arc<AtomicUsize>,
    /// Request kinds in arrival order
    history: Arc<Mutex<Vec<RequestKind>>>,
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            request_count: Arc::new(AtomicUsize::new(0)),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a working mock provider that always succeeds
    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    /// Create an intermittently failing mock provider
    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent {
            fail_every: fail_every.max(1),
        })
    }

    /// Create a failing mock provider that always errors
    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    /// Create a mock that fails any translation batch containing `marker`
    pub fn fail_on(marker: impl Into<String>) -> Self {
        Self::new(MockBehavior::FailOn {
            marker: marker.into(),
        })
    }

    /// Create a mock that answers slowly
    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    /// Total number of requests received
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Number of requests of a given kind
    pub fn calls_for(&self, kind: RequestKind) -> usize {
        self.history.lock().iter().filter(|k| **k == kind).count()
    }

    /// Text the mock produces for an entry
    pub fn transform(kind: RequestKind, text: &str) -> String {
        match kind {
            RequestKind::Translate => format!("[tr] {}", text),
            RequestKind::Correct => text.trim().to_string(),
            RequestKind::StyleAdjust => text.to_string(),
        }
    }

    /// Generate a well formed JSON payload for the request entries
    pub fn generate_payload(kind: RequestKind, entries: &[SubtitleEntry]) -> String {
        let output: Vec<SubtitleEntry> = entries
            .iter()
            .map(|e| e.with_text(Self::transform(kind, &e.text)))
            .collect();
        serde_json::to_string(&output).unwrap_or_else(|_| "[]".to_string())
    }
}

#[async_trait]
impl CompletionService for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        self.history.lock().push(request.kind);

        match &self.behavior {
            MockBehavior::Working => Ok(Self::generate_payload(request.kind, &request.entries)),

            MockBehavior::Intermittent { fail_every } => {
                if count % fail_every == fail_every - 1 {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated intermittent failure (request #{})", count + 1),
                        status_code: 503,
                    })
                } else {
                    Ok(Self::generate_payload(request.kind, &request.entries))
                }
            }

            MockBehavior::Failing => Err(ProviderError::ApiError {
                message: "Simulated provider failure".to_string(),
                status_code: 500,
            }),

            MockBehavior::FailOn { marker } => {
                let hit = request.kind == RequestKind::Translate
                    && request.entries.iter().any(|e| e.text.contains(marker.as_str()));
                if hit {
                    Err(ProviderError::ConnectionError(format!(
                        "Simulated failure for batch containing '{}'",
                        marker
                    )))
                } else {
                    Ok(Self::generate_payload(request.kind, &request.entries))
                }
            }

            MockBehavior::Messy => {
                let payload = Self::generate_payload(request.kind, &request.entries);
                let body = payload.trim_end_matches(']');
                Ok(format!(
                    "Sure, here are the entries:\n```json\n{},\n]\n```\nLet me know!",
                    body
                ))
            }

            MockBehavior::DropsEntry => {
                let keep = request.entries.len().saturating_sub(1);
                Ok(Self::generate_payload(request.kind, &request.entries[..keep]))
            }

            MockBehavior::Empty => Ok(String::new()),

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(tokio::time::Duration::from_millis(*delay_ms)).await;
                Ok(Self::generate_payload(request.kind, &request.entries))
            }
        }
    }

    fn model_id(&self) -> String {
        "mock:scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::response::extract_entries;

    fn request(kind: RequestKind, texts: &[&str]) -> CompletionRequest {
        let entries: Vec<SubtitleEntry> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| SubtitleEntry::new(i as f64, i as f64 + 1.0, *t))
            .collect();
        CompletionRequest {
            kind,
            system_prompt: String::new(),
            user_prompt: String::new(),
            expected_count: entries.len(),
            entries,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn test_working_shouldReturnOneEntryPerInput() {
        let mock = MockProvider::working();
        let raw = mock.complete(&request(RequestKind::Translate, &["a", "b"])).await.unwrap();
        let entries = extract_entries(&raw).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].text.as_deref(), Some("[tr] b"));
        assert_eq!(mock.calls_for(RequestKind::Translate), 1);
    }

    #[tokio::test]
    async fn test_intermittent_shouldFailEveryNth() {
        let mock = MockProvider::intermittent(2);
        let req = request(RequestKind::Translate, &["a"]);
        assert!(mock.complete(&req).await.is_ok());
        assert!(mock.complete(&req).await.is_err());
        assert!(mock.complete(&req).await.is_ok());
        assert_eq!(mock.request_count(), 3);
    }

    #[tokio::test]
    async fn test_failOn_shouldOnlyFailMatchingTranslations() {
        let mock = MockProvider::fail_on("boom");
        assert!(mock.complete(&request(RequestKind::Translate, &["boom here"])).await.is_err());
        assert!(mock.complete(&request(RequestKind::Correct, &["boom here"])).await.is_ok());
        assert!(mock.complete(&request(RequestKind::Translate, &["calm"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_messy_shouldStillBeRecoverable() {
        let mock = MockProvider::new(MockBehavior::Messy);
        let raw = mock.complete(&request(RequestKind::Translate, &["x", "y"])).await.unwrap();
        assert!(raw.contains("```json"));
        assert_eq!(extract_entries(&raw).unwrap().len(), 2);
    }
}

/*!
 * Completion service implementations.
 *
 * This module contains client implementations for the LLM backends the
 * orchestrator talks to:
 * - Ollama: Local LLM server
 * - Anthropic: Anthropic messages API
 * - Mock: scripted behaviours for tests
 */

use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt::Debug;
use std::sync::Arc;

use crate::app_config::{CompletionConfig, CompletionProvider};
use crate::errors::ProviderError;
use crate::subtitle::SubtitleEntry;

pub mod anthropic;
pub mod mock;
pub mod ollama;

/// What a completion request asks the model to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Translate entries into the target language
    Translate,
    /// Fix transcription errors in the source text
    Correct,
    /// Rewrite translated entries to match style options
    StyleAdjust,
}

impl RequestKind {
    /// Task name written into the user prompt
    pub fn task_name(&self) -> &'static str {
        match self {
            Self::Translate => "translate_subtitles",
            Self::Correct => "correct_subtitles",
            Self::StyleAdjust => "adjust_subtitle_style",
        }
    }
}

/// A single request to the completion backend
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Kind of work requested
    pub kind: RequestKind,
    /// Rendered system prompt
    pub system_prompt: String,
    /// JSON user prompt
    pub user_prompt: String,
    /// Entries carried by the user prompt
    pub entries: Vec<SubtitleEntry>,
    /// Number of entries expected back
    pub expected_count: usize,
    /// Sampling temperature
    pub temperature: f32,
}

/// Common trait for all completion backends
///
/// Implementations return the raw text produced by the model; extracting
/// and validating entries is the caller's job.
#[async_trait]
pub trait CompletionService: Send + Sync + Debug {
    /// Complete a request and return the raw model output
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;

    /// Identifier of the model answering requests
    fn model_id(&self) -> String;
}

/// Build the completion service selected in the configuration
pub fn build_service(config: &CompletionConfig) -> Arc<dyn CompletionService> {
    match config.provider {
        CompletionProvider::Ollama => Arc::new(ollama::Ollama::from_config(config)),
        CompletionProvider::Anthropic => Arc::new(anthropic::Anthropic::from_config(config)),
    }
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn status_error(status: StatusCode, message: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::AuthenticationError(message),
        429 => ProviderError::RateLimitExceeded(message),
        code => ProviderError::ApiError {
            status_code: code,
            message,
        },
    }
}

/// Map a transport failure to a provider error
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() {
        ProviderError::ConnectionError(err.to_string())
    } else {
        ProviderError::RequestFailed(err.to_string())
    }
}

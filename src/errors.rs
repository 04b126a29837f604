/*!
 * Error types for the subflow library.
 *
 * This module contains custom error types for the different parts of the
 * orchestration core, using the thiserror crate for ergonomic definitions.
 */

use thiserror::Error;

/// Errors that can occur when talking to a completion backend
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

/// Errors raised by a content source
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The video has no usable transcript
    #[error("No transcript available for video {video_id}: {reason}")]
    NoTranscript {
        /// Video the transcript was requested for
        video_id: String,
        /// Why nothing could be produced
        reason: String,
    },

    /// The source could not be read
    #[error("Failed to read subtitle source: {0}")]
    Unreadable(String),
}

/// Errors from a single segment translation attempt
#[derive(Error, Debug, Clone)]
pub enum SegmentError {
    /// Transport or model failure
    #[error("Completion failed: {0}")]
    Provider(#[from] ProviderError),

    /// The returned payload did not have the required shape
    #[error("Invalid completion payload: {0}")]
    Validation(String),

    /// A stop request arrived before the segment could finish
    #[error("Segment execution interrupted")]
    Interrupted,
}

/// Errors surfaced by the task orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// No task with this id exists
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// No video with this id exists
    #[error("Video not found: {0}")]
    VideoNotFound(String),

    /// The language code is not a known ISO 639 code
    #[error("Invalid language code: {0}")]
    InvalidLanguage(String),

    /// The task already has an execution registered
    #[error("Task {0} is already running")]
    AlreadyRunning(String),

    /// The requested action does not apply to the task's current state
    #[error("Invalid state for task {task_id}: {message}")]
    InvalidState {
        /// Task identifier
        task_id: String,
        /// What was wrong
        message: String,
    },

    /// Error from the persistent store
    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Convenience alias for orchestrator results
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;


/*!
 * # subflow - subtitle translation orchestration
 *
 * A Rust library that takes a long subtitle stream and drives its
 * translation by a language model as a durable, resumable task.
 *
 * ## Features
 *
 * - Splits subtitle streams into segments at natural boundaries
 * - Translates segments concurrently with validation and bounded retry
 * - Merges segment results, removing overlaps and near-duplicates
 * - Optional enhancement stages: keyword extraction, text correction,
 *   fragment stitching and style adjustment
 * - Persists every step in SQLite so tasks survive restarts
 * - Pause, continue, cancel, restart and delete running tasks
 * - Caches finished translations by source and configuration fingerprint
 * - Completion backends:
 *   - Ollama (local LLM)
 *   - Anthropic API
 *
 * ## Architecture
 *
 * - `app_config`: Configuration management
 * - `subtitle`: Subtitle entry model
 * - `sources`: Where subtitle entries come from
 * - `translation`: Segmentation, prompts, execution, merge and cache
 * - `enhancement`: Optional stages around the core translation
 * - `orchestrator`: Task lifecycle, worker pool and recovery
 * - `database`: SQLite persistence
 * - `progress`: Live progress events
 * - `providers`: Completion service clients
 * - `language`: ISO language code utilities
 * - `errors`: Custom error types
 */

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod app_config;
pub mod database;
pub mod enhancement;
pub mod errors;
pub mod language;
pub mod orchestrator;
pub mod progress;
pub mod providers;
pub mod sources;
pub mod subtitle;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use database::{Repository, TaskStatus, TaskStore, TranslationTask, VideoRecord};
pub use errors::{OrchestratorError, OrchestratorResult, ProviderError, SegmentError, SourceError};
pub use language::{codes_match, language_name, normalize_code};
pub use orchestrator::{AdminAction, ExecutionHandle, TaskOrchestrator};
pub use progress::{ProgressBroadcaster, ProgressEvent};
pub use providers::{CompletionService, build_service};
pub use sources::{ContentSource, JsonFileSource, StaticSource};
pub use subtitle::SubtitleEntry;

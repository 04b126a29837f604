use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Application configuration module
/// This module handles the application configuration including loading,
/// validating and saving configuration settings.
/// Represents the application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language of incoming subtitles
    #[serde(default = "default_source_language")]
    pub source_language: String,

    /// Completion backend settings
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Segmentation thresholds and scoring weights
    #[serde(default)]
    pub segmentation: SegmentationConfig,

    /// Segment execution, retry and worker pool settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Result merge thresholds
    #[serde(default)]
    pub merge: MergeConfig,

    /// Enhancement stage toggles and options
    #[serde(default)]
    pub enhancement: EnhancementConfig,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Stale task recovery settings
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Database file location (defaults to the user data directory)
    #[serde(default)]
    pub database_path: Option<String>,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Completion backend type
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    // @provider: Ollama
    #[default]
    Ollama,
    // @provider: Anthropic
    Anthropic,
}

impl CompletionProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Ollama => "Ollama",
            Self::Anthropic => "Anthropic",
        }
    }
}

impl std::fmt::Display for CompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl std::str::FromStr for CompletionProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "anthropic" => Ok(Self::Anthropic),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Completion backend configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompletionConfig {
    /// Backend to use
    #[serde(default)]
    pub provider: CompletionProvider,

    /// Model name
    #[serde(default = "default_model")]
    pub model: String,

    /// Service URL
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,

    /// API key (unused by Ollama)
    #[serde(default = "String::new")]
    pub api_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Temperature parameter for text generation (0.0 to 1.0)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens requested per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// System prompt template
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: CompletionProvider::default(),
            model: default_model(),
            endpoint: default_ollama_endpoint(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Thresholds and weights driving the segmentation engine
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SegmentationConfig {
    /// Inputs with at most this many entries form a single segment
    #[serde(default = "default_min_split_threshold")]
    pub min_split_threshold: usize,

    /// Preferred number of entries per segment
    #[serde(default = "default_target_segment_size")]
    pub target_segment_size: usize,

    /// Smallest segment the engine will produce when it can avoid it
    #[serde(default = "default_min_segment_size")]
    pub min_segment_size: usize,

    /// Largest segment, in entries
    #[serde(default = "default_max_segment_size")]
    pub max_segment_size: usize,

    /// Largest segment, in estimated tokens
    #[serde(default = "default_max_segment_tokens")]
    pub max_segment_tokens: usize,

    /// Largest segment, in seconds
    #[serde(default = "default_max_segment_duration_secs")]
    pub max_segment_duration_secs: f64,

    /// Gaps at or above this are "short" breaks
    #[serde(default = "default_short_gap_secs")]
    pub short_gap_secs: f64,

    /// Gaps at or above this are "medium" breaks
    #[serde(default = "default_medium_gap_secs")]
    pub medium_gap_secs: f64,

    /// Gaps at or above this are "long" breaks
    #[serde(default = "default_long_gap_secs")]
    pub long_gap_secs: f64,

    /// Weight of the time-gap score
    #[serde(default = "default_time_gap_weight")]
    pub time_gap_weight: f64,

    /// Weight of the semantic-break score
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,

    /// Weight of the length-fitness score
    #[serde(default = "default_length_weight")]
    pub length_weight: f64,

    /// Weight of the dangling-connective penalty
    #[serde(default = "default_continuity_weight")]
    pub continuity_weight: f64,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_split_threshold: default_min_split_threshold(),
            target_segment_size: default_target_segment_size(),
            min_segment_size: default_min_segment_size(),
            max_segment_size: default_max_segment_size(),
            max_segment_tokens: default_max_segment_tokens(),
            max_segment_duration_secs: default_max_segment_duration_secs(),
            short_gap_secs: default_short_gap_secs(),
            medium_gap_secs: default_medium_gap_secs(),
            long_gap_secs: default_long_gap_secs(),
            time_gap_weight: default_time_gap_weight(),
            semantic_weight: default_semantic_weight(),
            length_weight: default_length_weight(),
            continuity_weight: default_continuity_weight(),
        }
    }
}

/// Segment execution settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecutionConfig {
    /// Number of concurrent segment workers per task
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Capacity of the bounded segment job channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Total attempts per segment before it is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled on each retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Minimum length of a Latin-only run before an entry is flagged as untranslated
    #[serde(default = "default_untranslated_min_chars")]
    pub untranslated_min_chars: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            untranslated_min_chars: default_untranslated_min_chars(),
        }
    }
}

/// Result merge thresholds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MergeConfig {
    /// Adjacent entries at or above this similarity are near-duplicates
    #[serde(default = "default_dedup_similarity_threshold")]
    pub dedup_similarity_threshold: f64,

    /// Continuation score needed to join two entries
    #[serde(default = "default_semantic_merge_threshold")]
    pub semantic_merge_threshold: f64,

    /// Near-duplicates closer than this (seconds) are merged, farther ones dropped
    #[serde(default = "default_max_merge_gap_secs")]
    pub max_merge_gap_secs: f64,

    /// Largest gap (seconds) across which a continuation is joined
    #[serde(default = "default_max_continuation_gap_secs")]
    pub max_continuation_gap_secs: f64,

    /// Largest text produced by a continuation join
    #[serde(default = "default_max_merged_chars")]
    pub max_merged_chars: usize,

    /// Distance kept between an overlapping entry's end and the next start
    #[serde(default = "default_overlap_epsilon_secs")]
    pub overlap_epsilon_secs: f64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            dedup_similarity_threshold: default_dedup_similarity_threshold(),
            semantic_merge_threshold: default_semantic_merge_threshold(),
            max_merge_gap_secs: default_max_merge_gap_secs(),
            max_continuation_gap_secs: default_max_continuation_gap_secs(),
            max_merged_chars: default_max_merged_chars(),
            overlap_epsilon_secs: default_overlap_epsilon_secs(),
        }
    }
}

/// Register requested from the style adjustment stage
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Formality {
    #[default]
    Neutral,
    Formal,
    Casual,
}

impl std::fmt::Display for Formality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neutral => write!(f, "neutral"),
            Self::Formal => write!(f, "formal"),
            Self::Casual => write!(f, "casual"),
        }
    }
}

/// Options for the style adjustment stage
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StyleOptions {
    /// Target register
    #[serde(default)]
    pub formality: Formality,

    /// Free-form tone hint (e.g. "documentary", "playful")
    #[serde(default)]
    pub tone: Option<String>,

    /// Maximum characters per subtitle line
    #[serde(default = "default_max_line_chars")]
    pub max_line_chars: usize,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            formality: Formality::default(),
            tone: None,
            max_line_chars: default_max_line_chars(),
        }
    }
}

/// Relative weights of the per-stage quality signals
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct QualityWeights {
    #[serde(default = "default_correction_weight")]
    pub correction: f64,
    #[serde(default = "default_style_weight")]
    pub style: f64,
    #[serde(default = "default_keyword_weight")]
    pub keywords: f64,
    #[serde(default = "default_readability_weight")]
    pub readability: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            correction: default_correction_weight(),
            style: default_style_weight(),
            keywords: default_keyword_weight(),
            readability: default_readability_weight(),
        }
    }
}

/// Enhancement chain configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EnhancementConfig {
    /// Extract keywords used as consistency hints
    #[serde(default = "default_true")]
    pub keyword_extraction: bool,

    /// Correct the original text before translating
    #[serde(default)]
    pub text_correction: bool,

    /// Stitch fragmented source entries before translating
    #[serde(default)]
    pub pre_stitch: bool,

    /// Adjust translated style
    #[serde(default)]
    pub style_adjustment: bool,

    /// Semantic stitching of the merged translation
    #[serde(default = "default_true")]
    pub post_stitch: bool,

    /// Maximum number of keywords kept
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,

    /// Minimum occurrences for a term to become a keyword
    #[serde(default = "default_keyword_min_occurrences")]
    pub keyword_min_occurrences: usize,

    /// Entries per completion request in correction and style stages
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Reading speed ceiling used by the readability proxy
    #[serde(default = "default_max_chars_per_second")]
    pub max_chars_per_second: f64,

    /// Style options
    #[serde(default)]
    pub style: StyleOptions,

    /// Quality score weights
    #[serde(default)]
    pub quality_weights: QualityWeights,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            keyword_extraction: true,
            text_correction: false,
            pre_stitch: false,
            style_adjustment: false,
            post_stitch: true,
            max_keywords: default_max_keywords(),
            keyword_min_occurrences: default_keyword_min_occurrences(),
            chunk_size: default_chunk_size(),
            max_chars_per_second: default_max_chars_per_second(),
            style: StyleOptions::default(),
            quality_weights: QualityWeights::default(),
        }
    }
}

/// Result cache configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Whether lookups are performed before translating
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Age after which cached translations are purged
    #[serde(default = "default_cache_max_age_days")]
    pub max_age_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_days: default_cache_max_age_days(),
        }
    }
}

/// Stale task recovery configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    /// Whether the periodic sweep runs
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Heartbeat age after which an active task counts as abandoned
    #[serde(default = "default_heartbeat_stale_secs")]
    pub heartbeat_stale_secs: i64,

    /// Interval between sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_stale_secs: default_heartbeat_stale_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

fn default_source_language() -> String {
    "en".to_string()
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_system_prompt() -> String {
    "You are a professional subtitle translator. Translate subtitles from {source_language} to {target_language}. Keep one output entry per input entry, never change timing, and answer with JSON only.".to_string()
}

fn default_min_split_threshold() -> usize {
    25
}

fn default_target_segment_size() -> usize {
    20
}

fn default_min_segment_size() -> usize {
    8
}

fn default_max_segment_size() -> usize {
    30
}

fn default_max_segment_tokens() -> usize {
    2400
}

fn default_max_segment_duration_secs() -> f64 {
    600.0
}

fn default_short_gap_secs() -> f64 {
    0.5
}

fn default_medium_gap_secs() -> f64 {
    1.5
}

fn default_long_gap_secs() -> f64 {
    3.0
}

fn default_time_gap_weight() -> f64 {
    0.35
}

fn default_semantic_weight() -> f64 {
    0.35
}

fn default_length_weight() -> f64 {
    0.2
}

fn default_continuity_weight() -> f64 {
    0.1
}

fn default_concurrency() -> usize {
    3
}

fn default_queue_capacity() -> usize {
    8
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_untranslated_min_chars() -> usize {
    40
}

fn default_dedup_similarity_threshold() -> f64 {
    0.8
}

fn default_semantic_merge_threshold() -> f64 {
    0.3
}

fn default_max_merge_gap_secs() -> f64 {
    1.0
}

fn default_max_continuation_gap_secs() -> f64 {
    1.5
}

fn default_max_merged_chars() -> usize {
    180
}

fn default_overlap_epsilon_secs() -> f64 {
    0.001
}

fn default_max_line_chars() -> usize {
    42
}

fn default_correction_weight() -> f64 {
    0.2
}

fn default_style_weight() -> f64 {
    0.3
}

fn default_keyword_weight() -> f64 {
    0.2
}

fn default_readability_weight() -> f64 {
    0.3
}

fn default_max_keywords() -> usize {
    20
}

fn default_keyword_min_occurrences() -> usize {
    2
}

fn default_chunk_size() -> usize {
    25
}

fn default_max_chars_per_second() -> f64 {
    17.0
}

fn default_cache_max_age_days() -> i64 {
    30
}

fn default_heartbeat_stale_secs() -> i64 {
    120
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open config file: {}", path.display()))?;

        let reader = BufReader::new(file);
        let config: Config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Write this configuration as pretty JSON
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize config to JSON")?;

        std::fs::write(path, json)
            .with_context(|| format!("Failed to write config to file: {}", path.display()))?;

        Ok(())
    }

    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        if self.source_language.trim().is_empty() {
            return Err(anyhow!("Source language must not be empty"));
        }

        if self.completion.provider == CompletionProvider::Anthropic
            && self.completion.api_key.is_empty()
        {
            return Err(anyhow!("Completion API key is required for Anthropic provider"));
        }

        if !self.completion.endpoint.is_empty() {
            url::Url::parse(&self.completion.endpoint).with_context(|| {
                format!("Invalid completion endpoint: {}", self.completion.endpoint)
            })?;
        }

        let seg = &self.segmentation;
        if seg.min_segment_size == 0 {
            return Err(anyhow!("segmentation.min_segment_size must be at least 1"));
        }
        if seg.min_segment_size > seg.target_segment_size
            || seg.target_segment_size > seg.max_segment_size
        {
            return Err(anyhow!(
                "Segment sizes must satisfy min ({}) <= target ({}) <= max ({})",
                seg.min_segment_size,
                seg.target_segment_size,
                seg.max_segment_size
            ));
        }
        if !(seg.short_gap_secs <= seg.medium_gap_secs && seg.medium_gap_secs <= seg.long_gap_secs) {
            return Err(anyhow!("Gap thresholds must be ordered short <= medium <= long"));
        }

        if self.execution.concurrency == 0 {
            return Err(anyhow!("execution.concurrency must be at least 1"));
        }
        if self.execution.max_retries == 0 {
            return Err(anyhow!("execution.max_retries must be at least 1"));
        }

        for (name, value) in [
            ("merge.dedup_similarity_threshold", self.merge.dedup_similarity_threshold),
            ("merge.semantic_merge_threshold", self.merge.semantic_merge_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0 and 1, got {}", name, value));
            }
        }

        if self.recovery.heartbeat_stale_secs <= 0 {
            return Err(anyhow!("recovery.heartbeat_stale_secs must be positive"));
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: default_source_language(),
            completion: CompletionConfig::default(),
            segmentation: SegmentationConfig::default(),
            execution: ExecutionConfig::default(),
            merge: MergeConfig::default(),
            enhancement: EnhancementConfig::default(),
            cache: CacheConfig::default(),
            recovery: RecoveryConfig::default(),
            database_path: None,
            log_level: LogLevel::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shouldValidate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_withInvertedSegmentSizes_shouldFail() {
        let mut config = Config::default();
        config.segmentation.min_segment_size = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_withAnthropicAndNoKey_shouldFail() {
        let mut config = Config::default();
        config.completion.provider = CompletionProvider::Anthropic;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_withEmptyObject_shouldFillDefaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.execution.max_retries, 3);
        assert_eq!(config.execution.concurrency, 3);
        assert_eq!(config.recovery.heartbeat_stale_secs, 120);
        assert_eq!(config.merge.dedup_similarity_threshold, 0.8);
        assert!(config.enhancement.post_stitch);
    }

    #[test]
    fn test_providerFromStr_shouldBeCaseInsensitive() {
        let provider: CompletionProvider = "Anthropic".parse().unwrap();
        assert_eq!(provider, CompletionProvider::Anthropic);
        assert!("openai".parse::<CompletionProvider>().is_err());
    }
}

/*!
 * Enhancement orchestration.
 *
 * Optional quality stages run around the core translation in a fixed order:
 *
 * 1. keyword extraction
 * 2. text correction
 * 3. pre-translation stitching
 * 4. translation (driven by the task orchestrator)
 * 5. style adjustment
 * 6. post-translation stitching
 *
 * Every stage can be switched off in the configuration. A failing stage
 * hands its input through unchanged, is recorded as failed in the task's
 * `FeatureExecutionStatus`, and the chain continues. Only a failure of the
 * translation stage fails the task.
 */

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::app_config::{EnhancementConfig, MergeConfig};
use crate::database::models::now_rfc3339;
use crate::errors::SegmentError;
use crate::providers::{CompletionService, RequestKind};
use crate::subtitle::SubtitleEntry;
use crate::translation::continuity::ContinuityClassifier;
use crate::translation::executor::complete_entries;
use crate::translation::prompts::PromptBuilder;

pub mod correction;
pub mod keywords;
pub mod readability;
pub mod stitching;
pub mod style;

pub use correction::{CorrectionOutcome, TextCorrector};
pub use keywords::{KeywordExtractor, keyword_relevance};
pub use readability::readability_score;
pub use stitching::{StitchMode, Stitcher};
pub use style::{StyleAdjuster, style_consistency};

// ===== Feature status =====

/// Stages of the enhancement chain, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    KeywordExtraction,
    TextCorrection,
    PreStitch,
    Translation,
    StyleAdjustment,
    PostStitch,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::KeywordExtraction,
        Feature::TextCorrection,
        Feature::PreStitch,
        Feature::Translation,
        Feature::StyleAdjustment,
        Feature::PostStitch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::KeywordExtraction => "keyword_extraction",
            Feature::TextCorrection => "text_correction",
            Feature::PreStitch => "pre_stitch",
            Feature::Translation => "translation",
            Feature::StyleAdjustment => "style_adjustment",
            Feature::PostStitch => "post_stitch",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    #[default]
    Disabled,
    Pending,
    Running,
    Completed,
    Failed,
}

/// Execution record of one stage
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureRecord {
    pub enabled: bool,
    pub status: FeatureStatus,
    pub started_at: Option<String>,
    pub duration_ms: Option<i64>,
    /// Stage quality signal in 0..1, when the stage produces one
    pub quality: Option<f64>,
    pub error: Option<String>,
}

impl FeatureRecord {
    fn enabled(enabled: bool) -> Self {
        Self {
            enabled,
            status: if enabled {
                FeatureStatus::Pending
            } else {
                FeatureStatus::Disabled
            },
            ..Self::default()
        }
    }

    /// Mark the stage as running
    pub fn begin(&mut self) {
        self.status = FeatureStatus::Running;
        self.started_at = Some(now_rfc3339());
        self.duration_ms = None;
        self.error = None;
    }

    /// Record the outcome of a stage run
    pub fn finish(&mut self, result: &StageProcessingResult) {
        self.status = if result.success {
            FeatureStatus::Completed
        } else {
            FeatureStatus::Failed
        };
        self.duration_ms = Some(result.processing_time.as_millis() as i64);
        self.quality = result.quality;
        self.error = result.error.clone();
    }

    /// Mark a stage completed that was timed outside a `StageProcessingResult`
    pub fn complete(&mut self, quality: Option<f64>) {
        self.status = FeatureStatus::Completed;
        self.duration_ms = Some(self.elapsed().as_millis() as i64);
        self.quality = quality;
        self.error = None;
    }

    /// Mark a stage failed that was timed outside a `StageProcessingResult`
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = FeatureStatus::Failed;
        self.duration_ms = Some(self.elapsed().as_millis() as i64);
        self.error = Some(error.into());
    }

    /// Time since the stage started, zero when unknown
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .and_then(|t| (chrono::Utc::now() - t.with_timezone(&chrono::Utc)).to_std().ok())
            .unwrap_or_default()
    }

    pub fn is_completed(&self) -> bool {
        self.status == FeatureStatus::Completed
    }
}

/// Per-stage execution records of a task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureExecutionStatus {
    pub keyword_extraction: FeatureRecord,
    pub text_correction: FeatureRecord,
    pub pre_stitch: FeatureRecord,
    pub translation: FeatureRecord,
    pub style_adjustment: FeatureRecord,
    pub post_stitch: FeatureRecord,
}

impl FeatureExecutionStatus {
    /// Fresh status with every record enabled or disabled per the config
    pub fn from_config(config: &EnhancementConfig) -> Self {
        Self {
            keyword_extraction: FeatureRecord::enabled(config.keyword_extraction),
            text_correction: FeatureRecord::enabled(config.text_correction),
            pre_stitch: FeatureRecord::enabled(config.pre_stitch),
            translation: FeatureRecord::enabled(true),
            style_adjustment: FeatureRecord::enabled(config.style_adjustment),
            post_stitch: FeatureRecord::enabled(config.post_stitch),
        }
    }

    pub fn get(&self, feature: Feature) -> &FeatureRecord {
        match feature {
            Feature::KeywordExtraction => &self.keyword_extraction,
            Feature::TextCorrection => &self.text_correction,
            Feature::PreStitch => &self.pre_stitch,
            Feature::Translation => &self.translation,
            Feature::StyleAdjustment => &self.style_adjustment,
            Feature::PostStitch => &self.post_stitch,
        }
    }

    pub fn get_mut(&mut self, feature: Feature) -> &mut FeatureRecord {
        match feature {
            Feature::KeywordExtraction => &mut self.keyword_extraction,
            Feature::TextCorrection => &mut self.text_correction,
            Feature::PreStitch => &mut self.pre_stitch,
            Feature::Translation => &mut self.translation,
            Feature::StyleAdjustment => &mut self.style_adjustment,
            Feature::PostStitch => &mut self.post_stitch,
        }
    }

    /// Stages that ran and failed
    pub fn failed_features(&self) -> Vec<Feature> {
        Feature::ALL
            .into_iter()
            .filter(|f| self.get(*f).status == FeatureStatus::Failed)
            .collect()
    }
}

// ===== Stage results =====

/// Outcome of one enhancement stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageProcessingResult {
    pub success: bool,
    /// Stage output, or the unchanged input when the stage failed
    pub entries: Vec<SubtitleEntry>,
    pub processing_time: Duration,
    pub quality: Option<f64>,
    pub error: Option<String>,
}

impl StageProcessingResult {
    pub fn succeeded(entries: Vec<SubtitleEntry>, started: Instant, quality: Option<f64>) -> Self {
        Self {
            success: true,
            entries,
            processing_time: started.elapsed(),
            quality,
            error: None,
        }
    }

    pub fn fell_back(input: Vec<SubtitleEntry>, started: Instant, error: impl Into<String>) -> Self {
        Self {
            success: false,
            entries: input,
            processing_time: started.elapsed(),
            quality: None,
            error: Some(error.into()),
        }
    }
}

/// Output of the stages that run before translation
#[derive(Debug, Clone, PartialEq)]
pub struct PreTranslationOutput {
    pub entries: Vec<SubtitleEntry>,
    pub keywords: Vec<String>,
}

/// Run a request kind over `entries` in chunks, preserving order
pub(crate) async fn complete_in_chunks(
    service: &dyn CompletionService,
    prompts: &PromptBuilder,
    kind: RequestKind,
    entries: &[SubtitleEntry],
    chunk_size: usize,
) -> Result<Vec<SubtitleEntry>, SegmentError> {
    let mut out = Vec::with_capacity(entries.len());
    for chunk in entries.chunks(chunk_size.max(1)) {
        out.extend(complete_entries(service, prompts, kind, chunk).await?);
    }
    Ok(out)
}

// ===== Orchestrator =====

/// Runs the optional stages around the core translation
#[derive(Debug, Clone)]
pub struct EnhancementOrchestrator {
    config: EnhancementConfig,
    service: Arc<dyn CompletionService>,
    prompts: PromptBuilder,
    stitcher: Stitcher,
    extractor: KeywordExtractor,
}

impl EnhancementOrchestrator {
    pub fn new(
        config: EnhancementConfig,
        merge: &MergeConfig,
        service: Arc<dyn CompletionService>,
        prompts: PromptBuilder,
        classifier: Arc<dyn ContinuityClassifier>,
    ) -> Self {
        Self {
            extractor: KeywordExtractor::from_config(&config),
            stitcher: Stitcher::new(classifier, merge),
            config,
            service,
            prompts,
        }
    }

    pub fn config(&self) -> &EnhancementConfig {
        &self.config
    }

    /// Keyword extraction, correction and fragment stitching
    pub async fn run_pre_translation(
        &self,
        entries: Vec<SubtitleEntry>,
        status: &mut FeatureExecutionStatus,
    ) -> PreTranslationOutput {
        let mut keywords = Vec::new();
        let mut entries = entries;

        if self.config.keyword_extraction {
            status.keyword_extraction.begin();
            let (result, extracted) = self.extract_keywords(entries);
            status.keyword_extraction.finish(&result);
            entries = result.entries;
            keywords = extracted;
        }

        if self.config.text_correction {
            status.text_correction.begin();
            let result = self.correct_text(entries, &keywords).await;
            status.text_correction.finish(&result);
            entries = result.entries;
        }

        if self.config.pre_stitch {
            status.pre_stitch.begin();
            let result = self.stitch(entries, StitchMode::Fragments);
            status.pre_stitch.finish(&result);
            entries = result.entries;
        }

        info!(
            "Pre-translation stages produced {} entries and {} keywords",
            entries.len(),
            keywords.len()
        );

        PreTranslationOutput { entries, keywords }
    }

    /// Style adjustment and semantic stitching of the merged translation
    pub async fn run_post_translation(
        &self,
        entries: Vec<SubtitleEntry>,
        keywords: &[String],
        status: &mut FeatureExecutionStatus,
    ) -> Vec<SubtitleEntry> {
        let mut entries = entries;

        if self.config.style_adjustment {
            status.style_adjustment.begin();
            let result = self.adjust_style(entries, keywords).await;
            status.style_adjustment.finish(&result);
            entries = result.entries;
        }

        if self.config.post_stitch {
            status.post_stitch.begin();
            let result = self.stitch(entries, StitchMode::Semantic);
            status.post_stitch.finish(&result);
            entries = result.entries;
        }

        entries
    }

    pub fn extract_keywords(&self, entries: Vec<SubtitleEntry>) -> (StageProcessingResult, Vec<String>) {
        let started = Instant::now();
        let keywords = self.extractor.extract(&entries);
        debug!("Extracted keywords: {:?}", keywords);
        (StageProcessingResult::succeeded(entries, started, None), keywords)
    }

    pub async fn correct_text(&self, entries: Vec<SubtitleEntry>, keywords: &[String]) -> StageProcessingResult {
        let started = Instant::now();
        let corrector = TextCorrector::new(
            self.service.clone(),
            self.prompts.clone().with_keywords(keywords),
            self.config.chunk_size,
        );

        match corrector.correct(&entries).await {
            Ok(outcome) => {
                let quality = outcome.quality();
                StageProcessingResult::succeeded(outcome.entries, started, Some(quality))
            }
            Err(e) => {
                warn!("Text correction failed, keeping source text: {}", e);
                StageProcessingResult::fell_back(entries, started, e.to_string())
            }
        }
    }

    pub async fn adjust_style(&self, entries: Vec<SubtitleEntry>, keywords: &[String]) -> StageProcessingResult {
        let started = Instant::now();
        let adjuster = StyleAdjuster::new(
            self.service.clone(),
            self.prompts.clone().with_keywords(keywords),
            self.config.style.clone(),
            self.config.chunk_size,
        );

        match adjuster.adjust(&entries).await {
            Ok(adjusted) => {
                let quality = style_consistency(&adjusted, &self.config.style);
                StageProcessingResult::succeeded(adjusted, started, Some(quality))
            }
            Err(e) => {
                warn!("Style adjustment failed, keeping translation: {}", e);
                StageProcessingResult::fell_back(entries, started, e.to_string())
            }
        }
    }

    pub fn stitch(&self, entries: Vec<SubtitleEntry>, mode: StitchMode) -> StageProcessingResult {
        let started = Instant::now();
        let before = entries.len();
        let (stitched, joins) = self.stitcher.stitch(entries, mode);
        debug!("Stitching ({:?}) joined {} of {} entries", mode, joins, before);
        StageProcessingResult::succeeded(stitched, started, None)
    }

    /// Weighted quality score over the signals that are present, in 0..1
    ///
    /// Signals: correction rate, style consistency, keyword relevance and
    /// readability. Weights of missing signals are dropped and the rest
    /// renormalised.
    pub fn quality_score(
        &self,
        status: &FeatureExecutionStatus,
        keywords: &[String],
        entries: &[SubtitleEntry],
    ) -> Option<f64> {
        let weights = &self.config.quality_weights;
        let completed_quality = |record: &FeatureRecord| {
            if record.is_completed() { record.quality } else { None }
        };

        let signals = [
            (weights.correction, completed_quality(&status.text_correction)),
            (weights.style, completed_quality(&status.style_adjustment)),
            (weights.keywords, keyword_relevance(keywords, entries)),
            (
                weights.readability,
                readability_score(
                    entries,
                    self.config.max_chars_per_second,
                    self.config.style.max_line_chars,
                ),
            ),
        ];

        let (weighted, total) = signals
            .iter()
            .filter_map(|(weight, signal)| signal.map(|s| (*weight, s)))
            .fold((0.0, 0.0), |(weighted, total), (weight, s)| {
                (weighted + weight * s, total + weight)
            });

        if total > 0.0 { Some(weighted / total) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use crate::translation::continuity::HeuristicClassifier;

    fn orchestrator(config: EnhancementConfig, provider: MockProvider) -> EnhancementOrchestrator {
        EnhancementOrchestrator::new(
            config,
            &MergeConfig::default(),
            Arc::new(provider),
            PromptBuilder::new("en", "fr", "Translate from {source_language} to {target_language}."),
            Arc::new(HeuristicClassifier::new()),
        )
    }

    fn all_enabled() -> EnhancementConfig {
        EnhancementConfig {
            keyword_extraction: true,
            text_correction: true,
            pre_stitch: true,
            style_adjustment: true,
            post_stitch: true,
            ..EnhancementConfig::default()
        }
    }

    fn entries() -> Vec<SubtitleEntry> {
        vec![
            SubtitleEntry::new(0.0, 2.0, "Marcus found the map"),
            SubtitleEntry::new(2.1, 4.0, "...under the floorboards."),
            SubtitleEntry::new(5.0, 7.0, "Marcus kept it hidden."),
        ]
    }

    #[tokio::test]
    async fn test_preTranslation_shouldRunEnabledStagesInOrder() {
        let provider = MockProvider::working();
        let enhancer = orchestrator(all_enabled(), provider.clone());
        let mut status = FeatureExecutionStatus::from_config(enhancer.config());

        let output = enhancer.run_pre_translation(entries(), &mut status).await;

        assert_eq!(output.keywords, vec!["Marcus".to_string()]);
        assert_eq!(output.entries.len(), 2);
        assert_eq!(output.entries[0].text, "Marcus found the map under the floorboards.");
        assert!(status.keyword_extraction.is_completed());
        assert!(status.text_correction.is_completed());
        assert!(status.pre_stitch.is_completed());
        assert_eq!(status.style_adjustment.status, FeatureStatus::Pending);
        assert_eq!(provider.calls_for(RequestKind::Correct), 1);
    }

    #[tokio::test]
    async fn test_failingStage_shouldFallBackAndContinue() {
        let provider = MockProvider::failing();
        let enhancer = orchestrator(all_enabled(), provider);
        let mut status = FeatureExecutionStatus::from_config(enhancer.config());

        let output = enhancer.run_pre_translation(entries(), &mut status).await;
        assert_eq!(status.text_correction.status, FeatureStatus::Failed);
        assert!(status.text_correction.error.is_some());
        assert!(status.pre_stitch.is_completed());
        assert_eq!(output.entries.len(), 2);

        let translated = enhancer
            .run_post_translation(output.entries.clone(), &output.keywords, &mut status)
            .await;
        assert_eq!(status.style_adjustment.status, FeatureStatus::Failed);
        assert_eq!(translated, output.entries);
        assert_eq!(
            status.failed_features(),
            vec![Feature::TextCorrection, Feature::StyleAdjustment]
        );
    }

    #[tokio::test]
    async fn test_disabledStages_shouldNotCallService() {
        let provider = MockProvider::working();
        let config = EnhancementConfig {
            keyword_extraction: false,
            text_correction: false,
            pre_stitch: false,
            style_adjustment: false,
            post_stitch: false,
            ..EnhancementConfig::default()
        };
        let enhancer = orchestrator(config, provider.clone());
        let mut status = FeatureExecutionStatus::from_config(enhancer.config());

        let output = enhancer.run_pre_translation(entries(), &mut status).await;
        let final_entries = enhancer
            .run_post_translation(output.entries.clone(), &output.keywords, &mut status)
            .await;

        assert_eq!(final_entries, entries());
        assert_eq!(provider.request_count(), 0);
        assert_eq!(status.text_correction.status, FeatureStatus::Disabled);
    }

    #[test]
    fn test_qualityScore_shouldRenormalizeOverPresentSignals() {
        let enhancer = orchestrator(EnhancementConfig::default(), MockProvider::working());
        let status = FeatureExecutionStatus::from_config(enhancer.config());
        let comfortable = vec![SubtitleEntry::new(0.0, 3.0, "Marcus waits.")];

        // Only readability is present
        assert_eq!(enhancer.quality_score(&status, &[], &comfortable), Some(1.0));

        // Keyword relevance 0 with weight 0.2 against readability 1 with weight 0.3
        let score = enhancer
            .quality_score(&status, &["Helena".to_string()], &comfortable)
            .unwrap();
        assert!((score - 0.6).abs() < 1e-9);

        assert_eq!(enhancer.quality_score(&status, &[], &[]), None);
    }

    #[test]
    fn test_featureExecutionStatus_shouldDeserializeFromEmptyObject() {
        let status: FeatureExecutionStatus = serde_json::from_str("{}").unwrap();
        assert_eq!(status, FeatureExecutionStatus::default());
    }
}

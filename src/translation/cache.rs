/*!
 * Content-addressed translation cache.
 *
 * Finished translations are stored per (video, target language) together
 * with two fingerprints: one over the source entries and one over the
 * configuration values that influence the output. A lookup only hits when
 * both fingerprints match, so editing the source or changing the model,
 * prompts or thresholds always retranslates.
 */

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::app_config::Config;
use crate::database::{CacheEntry, TaskStore};
use crate::database::models::now_rfc3339;
use crate::subtitle::SubtitleEntry;

/// SHA-256 over the ordered `(start, end, text)` tuples
pub fn source_fingerprint(entries: &[SubtitleEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(format!("{:.3}|{:.3}|", entry.start, entry.end).as_bytes());
        hasher.update(entry.text.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Output-affecting configuration values, keyed and sorted
///
/// Runtime knobs such as concurrency, retries, timeouts and the database
/// location are deliberately absent.
pub fn config_snapshot(config: &Config) -> BTreeMap<String, String> {
    let c = &config.completion;
    let s = &config.segmentation;
    let m = &config.merge;
    let e = &config.enhancement;

    let pairs = [
        ("completion.provider", c.provider.to_string()),
        ("completion.model", c.model.clone()),
        ("completion.temperature", c.temperature.to_string()),
        ("completion.system_prompt", c.system_prompt.clone()),
        ("source_language", config.source_language.clone()),
        ("segmentation.min_split_threshold", s.min_split_threshold.to_string()),
        ("segmentation.target_segment_size", s.target_segment_size.to_string()),
        ("segmentation.min_segment_size", s.min_segment_size.to_string()),
        ("segmentation.max_segment_size", s.max_segment_size.to_string()),
        ("segmentation.max_segment_tokens", s.max_segment_tokens.to_string()),
        ("segmentation.max_segment_duration_secs", s.max_segment_duration_secs.to_string()),
        ("segmentation.short_gap_secs", s.short_gap_secs.to_string()),
        ("segmentation.medium_gap_secs", s.medium_gap_secs.to_string()),
        ("segmentation.long_gap_secs", s.long_gap_secs.to_string()),
        ("segmentation.time_gap_weight", s.time_gap_weight.to_string()),
        ("segmentation.semantic_weight", s.semantic_weight.to_string()),
        ("segmentation.length_weight", s.length_weight.to_string()),
        ("segmentation.continuity_weight", s.continuity_weight.to_string()),
        ("merge.dedup_similarity_threshold", m.dedup_similarity_threshold.to_string()),
        ("merge.semantic_merge_threshold", m.semantic_merge_threshold.to_string()),
        ("merge.max_merge_gap_secs", m.max_merge_gap_secs.to_string()),
        ("merge.max_continuation_gap_secs", m.max_continuation_gap_secs.to_string()),
        ("merge.max_merged_chars", m.max_merged_chars.to_string()),
        ("merge.overlap_epsilon_secs", m.overlap_epsilon_secs.to_string()),
        ("enhancement.keyword_extraction", e.keyword_extraction.to_string()),
        ("enhancement.text_correction", e.text_correction.to_string()),
        ("enhancement.pre_stitch", e.pre_stitch.to_string()),
        ("enhancement.style_adjustment", e.style_adjustment.to_string()),
        ("enhancement.post_stitch", e.post_stitch.to_string()),
        ("enhancement.max_keywords", e.max_keywords.to_string()),
        ("enhancement.keyword_min_occurrences", e.keyword_min_occurrences.to_string()),
        ("enhancement.chunk_size", e.chunk_size.to_string()),
        ("enhancement.style.formality", e.style.formality.to_string()),
        ("enhancement.style.tone", e.style.tone.clone().unwrap_or_default()),
        ("enhancement.style.max_line_chars", e.style.max_line_chars.to_string()),
    ];

    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// SHA-256 over the sorted `key=value` lines of the config snapshot
pub fn config_fingerprint(config: &Config) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in config_snapshot(config) {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Hit/miss counters of one cache instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Store-backed result cache
#[derive(Debug, Clone)]
pub struct ResultCache {
    store: Arc<dyn TaskStore>,
    enabled: bool,
    config_fingerprint: String,
    config_snapshot: String,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResultCache {
    /// Create a cache for results produced under `config`
    pub fn new(store: Arc<dyn TaskStore>, config: &Config) -> Self {
        let snapshot = serde_json::to_string(&config_snapshot(config)).unwrap_or_default();
        Self {
            store,
            enabled: config.cache.enabled,
            config_fingerprint: config_fingerprint(config),
            config_snapshot: snapshot,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether lookups and writes are performed at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fingerprint of the configuration this cache was built with
    pub fn config_fingerprint(&self) -> &str {
        &self.config_fingerprint
    }

    /// Look up a finished translation for the given source entries
    ///
    /// Store errors are logged and count as a miss.
    pub async fn lookup(
        &self,
        video_id: &str,
        target_language: &str,
        source: &[SubtitleEntry],
    ) -> Option<Vec<SubtitleEntry>> {
        if !self.enabled {
            return None;
        }

        let entry = match self.store.get_cache_entry(video_id, target_language).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache lookup failed for {} ({}): {}", video_id, target_language, e);
                None
            }
        };

        let fingerprint = source_fingerprint(source);
        match entry {
            Some(entry)
                if entry.source_fingerprint == fingerprint
                    && entry.config_fingerprint == self.config_fingerprint =>
            {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {} ({})", video_id, target_language);
                if let Err(e) = self.store.record_cache_hit(video_id, target_language).await {
                    warn!("Failed to record cache hit for {}: {}", video_id, e);
                }
                Some(entry.entries)
            }
            Some(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache entry for {} ({}) is stale", video_id, target_language);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Cache miss for {} ({})", video_id, target_language);
                None
            }
        }
    }

    /// Store a finished translation; failures are logged and ignored
    pub async fn store(
        &self,
        video_id: &str,
        target_language: &str,
        source: &[SubtitleEntry],
        entries: &[SubtitleEntry],
        model_id: &str,
    ) {
        if !self.enabled {
            return;
        }

        let now = now_rfc3339();
        let entry = CacheEntry {
            video_id: video_id.to_string(),
            target_language: target_language.to_string(),
            source_fingerprint: source_fingerprint(source),
            config_fingerprint: self.config_fingerprint.clone(),
            entries: entries.to_vec(),
            model_id: model_id.to_string(),
            config_snapshot: self.config_snapshot.clone(),
            access_count: 0,
            last_accessed_at: None,
            created_at: now.clone(),
            updated_at: now,
        };

        match self.store.upsert_cache_entry(&entry).await {
            Ok(()) => debug!("Cached {} entries for {} ({})", entries.len(), video_id, target_language),
            Err(e) => warn!("Failed to cache translation for {} ({}): {}", video_id, target_language, e),
        }
    }

    /// Delete cached translations older than `days`
    pub async fn purge_older_than(&self, days: i64) -> Result<usize> {
        self.store.purge_cache_older_than(days).await
    }

    /// Hit/miss statistics since construction
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

/*!
 * Segmentation engine.
 *
 * Splits an ordered list of subtitle entries into contiguous, bounded
 * segments that can be translated independently. Break points are scored
 * from three signals (time gap, semantic break and distance to the ideal
 * size), with a penalty for cutting right after a dangling connective.
 *
 * The engine is a pure function of its input and configuration: the same
 * entries always produce the same boundaries, which is what lets a resumed
 * task reuse the segment tasks stored by an earlier run.
 */

use std::collections::BTreeSet;
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::app_config::SegmentationConfig;
use crate::subtitle::{SubtitleEntry, span_duration};
use crate::translation::continuity::{ContinuityClassifier, HeuristicClassifier};

/// A contiguous slice of subtitle entries with sizing metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Zero-based position of the segment in the output
    pub index: usize,

    /// Index of the first entry (inclusive)
    pub start_index: usize,

    /// Index one past the last entry (exclusive)
    pub end_index: usize,

    /// Entries covered by the segment
    pub entries: Vec<SubtitleEntry>,

    /// Time span in seconds
    pub duration: f64,

    /// Number of characters across all entries
    pub character_count: usize,

    /// Estimated prompt tokens
    pub estimated_tokens: usize,

    /// Fitness of the segment size relative to the target (0-100)
    pub confidence: f64,
}

impl Segment {
    /// Build a segment over `entries[start_index..end_index]`
    pub fn from_range(
        index: usize,
        entries: &[SubtitleEntry],
        start_index: usize,
        end_index: usize,
        target_size: usize,
    ) -> Self {
        let slice = entries[start_index..end_index].to_vec();
        let character_count = crate::subtitle::total_chars(&slice);
        let estimated_tokens = crate::subtitle::estimate_tokens(&slice);
        let duration = span_duration(&slice);

        Self {
            index,
            start_index,
            end_index,
            duration,
            character_count,
            estimated_tokens,
            confidence: size_confidence(slice.len(), target_size),
            entries: slice,
        }
    }

    /// Number of entries in the segment
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the segment has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Confidence derived from how close `len` is to `target`
pub fn size_confidence(len: usize, target: usize) -> f64 {
    if target == 0 {
        return 0.0;
    }
    let deviation = (len as f64 - target as f64).abs() / target as f64;
    (100.0 * (1.0 - deviation)).clamp(0.0, 100.0)
}

/// Classification of the silence between two entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapClass {
    None,
    Short,
    Medium,
    Long,
}

impl GapClass {
    fn score(self) -> f64 {
        match self {
            Self::None => 0.0,
            Self::Short => 0.3,
            Self::Medium => 0.6,
            Self::Long => 1.0,
        }
    }
}

/// Score of a candidate break placed before entry `index`
#[derive(Debug, Clone, Copy)]
struct Candidate {
    index: usize,
    score: f64,
}

/// Splits subtitle streams into bounded segments
#[derive(Debug, Clone)]
pub struct Segmenter {
    config: SegmentationConfig,
    classifier: Arc<dyn ContinuityClassifier>,
}

impl Segmenter {
    /// Create a segmenter using the heuristic continuity classifier
    pub fn new(config: SegmentationConfig) -> Self {
        Self::with_classifier(config, Arc::new(HeuristicClassifier::new()))
    }

    /// Create a segmenter with a custom continuity classifier
    pub fn with_classifier(
        config: SegmentationConfig,
        classifier: Arc<dyn ContinuityClassifier>,
    ) -> Self {
        Self { config, classifier }
    }

    /// The configuration this segmenter was built with
    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    /// Classify the gap between two consecutive entries
    pub fn classify_gap(&self, prev: &SubtitleEntry, next: &SubtitleEntry) -> GapClass {
        let gap = next.start - prev.end;
        if gap >= self.config.long_gap_secs {
            GapClass::Long
        } else if gap >= self.config.medium_gap_secs {
            GapClass::Medium
        } else if gap >= self.config.short_gap_secs {
            GapClass::Short
        } else {
            GapClass::None
        }
    }

    /// Split entries into ordered, contiguous, full-coverage segments
    pub fn segment(&self, entries: &[SubtitleEntry]) -> Vec<Segment> {
        let n = entries.len();
        if n == 0 {
            return Vec::new();
        }

        if n <= self.config.min_split_threshold {
            return vec![Segment::from_range(0, entries, 0, n, self.config.target_segment_size)];
        }

        let sizing = Sizing::new(entries);
        let scores = self.score_all(entries);

        let mut candidates: Vec<Candidate> = scores
            .iter()
            .enumerate()
            .filter(|(i, _)| self.within_margin(*i, n))
            .map(|(index, score)| Candidate { index, score: *score })
            .collect();
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));

        let mut breaks: BTreeSet<usize> = BTreeSet::from([0, n]);
        let min = self.config.min_segment_size;

        for candidate in &candidates {
            if !self.any_oversized(&breaks, &sizing, entries) {
                break;
            }

            let c = candidate.index;
            let (lo, hi) = enclosing(&breaks, c);
            if !self.is_oversized(lo, hi, &sizing, entries) {
                continue;
            }
            if c - lo < min || hi - c < min {
                continue;
            }
            breaks.insert(c);
        }

        self.force_split_oversized(&mut breaks, &scores, &sizing, entries);

        let mut bounds: Vec<(usize, usize)> = breaks
            .iter()
            .zip(breaks.iter().skip(1))
            .map(|(lo, hi)| (*lo, *hi))
            .collect();
        self.merge_small(&mut bounds, &sizing, entries);

        debug!(
            "Segmented {} entries into {} segments (boundaries: {:?})",
            n,
            bounds.len(),
            bounds.iter().map(|(lo, _)| *lo).collect::<Vec<_>>()
        );

        bounds
            .into_iter()
            .enumerate()
            .map(|(i, (lo, hi))| {
                Segment::from_range(i, entries, lo, hi, self.config.target_segment_size)
            })
            .collect()
    }

    /// Score every possible break position; index 0 is never a candidate
    fn score_all(&self, entries: &[SubtitleEntry]) -> Vec<f64> {
        let n = entries.len();
        let cfg = &self.config;
        let parts = n.div_ceil(cfg.target_segment_size.max(1)).max(1);

        let mut scores = vec![f64::NEG_INFINITY; n];
        for (i, score) in scores.iter_mut().enumerate().skip(1) {
            let prev = &entries[i - 1];
            let next = &entries[i];

            let time = self.classify_gap(prev, next).score();
            let semantic = self.classifier.semantic_break_score(&prev.text, &next.text);
            let length = length_fitness(i, n, parts, cfg.target_segment_size);
            let penalty = if self.classifier.ends_with_dangling_connective(&prev.text) {
                1.0
            } else {
                0.0
            };

            *score = time * cfg.time_gap_weight + semantic * cfg.semantic_weight
                + length * cfg.length_weight
                - penalty * cfg.continuity_weight;
        }
        scores
    }

    fn within_margin(&self, i: usize, n: usize) -> bool {
        let min = self.config.min_segment_size.max(1);
        i >= min && i + min <= n
    }

    fn is_oversized(&self, lo: usize, hi: usize, sizing: &Sizing, entries: &[SubtitleEntry]) -> bool {
        let len = hi - lo;
        if len < 2 {
            return false;
        }
        len > self.config.max_segment_size
            || sizing.tokens(lo, hi) > self.config.max_segment_tokens
            || span_duration(&entries[lo..hi]) > self.config.max_segment_duration_secs
    }

    fn any_oversized(&self, breaks: &BTreeSet<usize>, sizing: &Sizing, entries: &[SubtitleEntry]) -> bool {
        breaks
            .iter()
            .zip(breaks.iter().skip(1))
            .any(|(lo, hi)| self.is_oversized(*lo, *hi, sizing, entries))
    }

    /// Split segments that are still oversized at their best interior index
    fn force_split_oversized(
        &self,
        breaks: &mut BTreeSet<usize>,
        scores: &[f64],
        sizing: &Sizing,
        entries: &[SubtitleEntry],
    ) {
        let min = self.config.min_segment_size.max(1);

        loop {
            let oversized = breaks
                .iter()
                .zip(breaks.iter().skip(1))
                .map(|(lo, hi)| (*lo, *hi))
                .find(|(lo, hi)| self.is_oversized(*lo, *hi, sizing, entries));

            let Some((lo, hi)) = oversized else {
                break;
            };

            // Prefer positions that keep both halves at least min-sized
            let spaced = best_in_range(scores, lo + min, (hi + 1).saturating_sub(min));
            let split = spaced.or_else(|| best_in_range(scores, lo + 1, hi));

            match split {
                Some(index) => {
                    breaks.insert(index);
                }
                None => break,
            }
        }
    }

    /// Fold segments shorter than the minimum into a neighbour
    fn merge_small(&self, bounds: &mut Vec<(usize, usize)>, sizing: &Sizing, entries: &[SubtitleEntry]) {
        let min = self.config.min_segment_size;
        let mut i = 0;

        while i < bounds.len() && bounds.len() > 1 {
            let (lo, hi) = bounds[i];
            if hi - lo >= min {
                i += 1;
                continue;
            }

            if i > 0 {
                let (prev_lo, _) = bounds[i - 1];
                if !self.is_oversized(prev_lo, hi, sizing, entries) {
                    bounds[i - 1] = (prev_lo, hi);
                    bounds.remove(i);
                    continue;
                }
            }

            if i + 1 < bounds.len() {
                let (_, next_hi) = bounds[i + 1];
                if !self.is_oversized(lo, next_hi, sizing, entries) {
                    bounds[i] = (lo, next_hi);
                    bounds.remove(i + 1);
                    continue;
                }
            }

            i += 1;
        }
    }
}

/// Prefix sums used to size arbitrary ranges in constant time
struct Sizing {
    char_prefix: Vec<usize>,
}

impl Sizing {
    fn new(entries: &[SubtitleEntry]) -> Self {
        let mut char_prefix = Vec::with_capacity(entries.len() + 1);
        char_prefix.push(0);
        for entry in entries {
            let last = char_prefix.last().copied().unwrap_or(0);
            char_prefix.push(last + entry.char_count());
        }
        Self { char_prefix }
    }

    fn tokens(&self, lo: usize, hi: usize) -> usize {
        let chars = self.char_prefix[hi] - self.char_prefix[lo];
        chars.div_ceil(4) + (hi - lo)
    }
}

/// Boundaries immediately below and above `index`
fn enclosing(breaks: &BTreeSet<usize>, index: usize) -> (usize, usize) {
    let lo = breaks.range(..index).next_back().copied().unwrap_or(0);
    let hi = breaks.range(index + 1..).next().copied().unwrap_or(index);
    (lo, hi)
}

/// Highest scoring index in `[from, to)`, ties resolved to the lower index
fn best_in_range(scores: &[f64], from: usize, to: usize) -> Option<usize> {
    (from..to)
        .filter(|i| *i > 0 && *i < scores.len())
        .fold(None, |best: Option<usize>, i| match best {
            Some(b) if scores[b] >= scores[i] => Some(b),
            _ => Some(i),
        })
}

/// Closeness of `index` to the nearest ideal boundary `k * n / parts` (1.0 = on it)
fn length_fitness(index: usize, n: usize, parts: usize, target: usize) -> f64 {
    if parts <= 1 || target == 0 {
        return 0.0;
    }

    let distance = (1..parts)
        .map(|k| {
            let ideal = k as f64 * n as f64 / parts as f64;
            (index as f64 - ideal).abs()
        })
        .fold(f64::INFINITY, f64::min);

    1.0 - (distance / target as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORDS: &[&str] = &[
        "apple", "river", "mountain", "cloud", "engine", "garden", "planet", "violin", "harbor",
        "candle", "forest", "bridge", "silver", "meadow", "rocket", "castle",
    ];

    fn entries(count: usize) -> Vec<SubtitleEntry> {
        (0..count)
            .map(|i| {
                let start = i as f64 * 2.5;
                let text = format!("The {} number {} is here.", WORDS[i % WORDS.len()], i);
                SubtitleEntry::new(start, start + 2.0, text)
            })
            .collect()
    }

    fn assert_full_coverage(segments: &[Segment], n: usize) {
        assert_eq!(segments.first().map(|s| s.start_index), Some(0));
        assert_eq!(segments.last().map(|s| s.end_index), Some(n));
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end_index, pair[1].start_index);
        }
        let total: usize = segments.iter().map(|s| s.len()).sum();
        assert_eq!(total, n);
    }

    #[test]
    fn test_segment_withEmptyInput_shouldReturnNothing() {
        let segmenter = Segmenter::new(SegmentationConfig::default());
        assert!(segmenter.segment(&[]).is_empty());
    }

    #[test]
    fn test_segment_belowThreshold_shouldReturnSingleSegment() {
        let segmenter = Segmenter::new(SegmentationConfig::default());
        let input = entries(25);
        let segments = segmenter.segment(&input);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 25);
    }

    #[test]
    fn test_segment_withLongInput_shouldCoverEverythingWithinBounds() {
        let config = SegmentationConfig::default();
        let segmenter = Segmenter::new(config.clone());
        let input = entries(200);
        let segments = segmenter.segment(&input);

        assert_full_coverage(&segments, input.len());
        for segment in &segments {
            assert!(segment.len() <= config.max_segment_size);
            assert!(segment.len() >= config.min_segment_size);
        }
    }

    #[test]
    fn test_segment_shouldBeDeterministic() {
        let segmenter = Segmenter::new(SegmentationConfig::default());
        let input = entries(137);
        assert_eq!(segmenter.segment(&input), segmenter.segment(&input));
    }

    #[test]
    fn test_segment_shouldPreferLongGaps() {
        let segmenter = Segmenter::new(SegmentationConfig::default());
        let mut input = entries(40);
        // Open a long silence before entry 22 and shift the rest
        for entry in input.iter_mut().skip(22) {
            entry.start += 10.0;
            entry.end += 10.0;
        }

        let segments = segmenter.segment(&input);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].start_index, 22);
    }

    #[test]
    fn test_segment_withTokenLimit_shouldSplitDenseText() {
        let config = SegmentationConfig {
            max_segment_tokens: 60,
            ..SegmentationConfig::default()
        };
        let segmenter = Segmenter::new(config);
        let input = entries(30);
        let segments = segmenter.segment(&input);

        assert_full_coverage(&segments, input.len());
        assert!(segments.len() > 1);
    }

    #[test]
    fn test_sizeConfidence_shouldPeakAtTarget() {
        assert_eq!(size_confidence(20, 20), 100.0);
        assert_eq!(size_confidence(10, 20), 50.0);
        assert_eq!(size_confidence(60, 20), 0.0);
    }

    #[test]
    fn test_classifyGap_shouldUseThresholds() {
        let segmenter = Segmenter::new(SegmentationConfig::default());
        let a = SubtitleEntry::new(0.0, 1.0, "a");
        assert_eq!(segmenter.classify_gap(&a, &SubtitleEntry::new(1.1, 2.0, "b")), GapClass::None);
        assert_eq!(segmenter.classify_gap(&a, &SubtitleEntry::new(1.6, 3.0, "b")), GapClass::Short);
        assert_eq!(segmenter.classify_gap(&a, &SubtitleEntry::new(2.6, 3.0, "b")), GapClass::Medium);
        assert_eq!(segmenter.classify_gap(&a, &SubtitleEntry::new(5.0, 6.0, "b")), GapClass::Long);
    }
}

/*!
 * Result merge.
 *
 * Joins the entries produced by individual segments into one ordered
 * subtitle track. Segment boundaries are where models tend to repeat or
 * split lines, so after ordering and overlap clamping two passes clean up:
 *
 * - dedup: adjacent near-duplicates are merged (small gap) or the later
 *   one is dropped (large gap)
 * - continuation: an entry left mid-clause followed by one that continues
 *   it are joined, removing any words repeated at the seam
 */

use std::sync::Arc;

use log::debug;

use crate::app_config::MergeConfig;
use crate::subtitle::SubtitleEntry;
use crate::translation::continuity::{ContinuityClassifier, HeuristicClassifier, normalize_word};
use crate::translation::similarity::similarity;

/// Largest run of words considered when removing seam overlap
const MAX_SEAM_WORDS: usize = 6;

/// Statistics from one merge run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Entries before the cleanup passes
    pub input_entries: usize,
    /// Entry ends pulled back to avoid overlap
    pub clamped: usize,
    /// Near-duplicates folded into their neighbour
    pub deduplicated: usize,
    /// Near-duplicates dropped
    pub dropped: usize,
    /// Continuations joined
    pub joined: usize,
}

/// Merges segment results into a single ordered track
#[derive(Debug, Clone)]
pub struct ResultMerger {
    config: MergeConfig,
    classifier: Arc<dyn ContinuityClassifier>,
}

impl ResultMerger {
    /// Create a merger using the heuristic continuity classifier
    pub fn new(config: MergeConfig) -> Self {
        Self::with_classifier(config, Arc::new(HeuristicClassifier::new()))
    }

    /// Create a merger with a custom continuity classifier
    pub fn with_classifier(config: MergeConfig, classifier: Arc<dyn ContinuityClassifier>) -> Self {
        Self { config, classifier }
    }

    /// Merge `(segment_index, entries)` pairs into one track
    pub fn merge(&self, segments: Vec<(i64, Vec<SubtitleEntry>)>) -> Vec<SubtitleEntry> {
        self.merge_with_report(segments).0
    }

    /// Merge and report what the cleanup passes did
    pub fn merge_with_report(
        &self,
        mut segments: Vec<(i64, Vec<SubtitleEntry>)>,
    ) -> (Vec<SubtitleEntry>, MergeReport) {
        segments.sort_by_key(|(index, _)| *index);

        let mut entries: Vec<SubtitleEntry> =
            segments.into_iter().flat_map(|(_, entries)| entries).collect();
        let mut report = MergeReport {
            input_entries: entries.len(),
            ..MergeReport::default()
        };

        // Stable: equal starts keep segment order
        entries.sort_by(|a, b| a.start.total_cmp(&b.start));

        report.clamped = self.clamp_overlaps(&mut entries);
        let entries = self.dedup(entries, &mut report);
        let entries = self.join_continuations(entries, &mut report);

        debug!(
            "Merged {} entries into {} (clamped {}, deduplicated {}, dropped {}, joined {})",
            report.input_entries,
            entries.len(),
            report.clamped,
            report.deduplicated,
            report.dropped,
            report.joined
        );

        (entries, report)
    }

    fn clamp_overlaps(&self, entries: &mut [SubtitleEntry]) -> usize {
        let mut clamped = 0;
        for i in 1..entries.len() {
            let next_start = entries[i].start;
            let prev = &mut entries[i - 1];
            if prev.end > next_start {
                prev.end = (next_start - self.config.overlap_epsilon_secs).max(prev.start);
                clamped += 1;
            }
        }
        clamped
    }

    fn dedup(&self, entries: Vec<SubtitleEntry>, report: &mut MergeReport) -> Vec<SubtitleEntry> {
        let mut out: Vec<SubtitleEntry> = Vec::with_capacity(entries.len());

        for entry in entries {
            let Some(last) = out.last_mut() else {
                out.push(entry);
                continue;
            };

            if similarity(&last.text, &entry.text) < self.config.dedup_similarity_threshold {
                out.push(entry);
                continue;
            }

            let gap = entry.start - last.end;
            if gap <= self.config.max_merge_gap_secs {
                if entry.char_count() > last.char_count() {
                    last.text = entry.text;
                }
                last.start = last.start.min(entry.start);
                last.end = last.end.max(entry.end);
                report.deduplicated += 1;
            } else {
                report.dropped += 1;
            }
        }

        out
    }

    fn join_continuations(&self, entries: Vec<SubtitleEntry>, report: &mut MergeReport) -> Vec<SubtitleEntry> {
        let mut out: Vec<SubtitleEntry> = Vec::with_capacity(entries.len());

        for entry in entries {
            let Some(last) = out.last_mut() else {
                out.push(entry);
                continue;
            };

            if self.should_join(last, &entry) {
                last.text = join_with_overlap(&last.text, &entry.text);
                last.end = last.end.max(entry.end);
                report.joined += 1;
            } else {
                out.push(entry);
            }
        }

        out
    }

    fn should_join(&self, prev: &SubtitleEntry, next: &SubtitleEntry) -> bool {
        let gap = next.start - prev.end;
        if gap > self.config.max_continuation_gap_secs {
            return false;
        }
        if prev.char_count() + next.char_count() + 1 > self.config.max_merged_chars {
            return false;
        }

        !self.classifier.ends_sentence(&prev.text)
            && self.classifier.starts_with_continuation(&next.text)
            && self.classifier.continuation_score(&prev.text, &next.text)
                >= self.config.semantic_merge_threshold
    }
}

/// Join two fragments, dropping words the second repeats from the end of the first
pub fn join_with_overlap(first: &str, second: &str) -> String {
    let first = first.trim_end().trim_end_matches("...").trim_end_matches('…').trim_end();
    let second = second.trim_start().trim_start_matches("...").trim_start_matches('…').trim_start();

    let first_words: Vec<&str> = first.split_whitespace().collect();
    let second_words: Vec<&str> = second.split_whitespace().collect();

    let max_overlap = MAX_SEAM_WORDS.min(first_words.len()).min(second_words.len());
    let overlap = (1..=max_overlap)
        .rev()
        .find(|k| {
            let tail = &first_words[first_words.len() - k..];
            let head = &second_words[..*k];
            tail.iter()
                .zip(head.iter())
                .all(|(a, b)| normalize_word(a) == normalize_word(b))
        })
        .unwrap_or(0);

    let rest = second_words[overlap..].join(" ");
    match (first.is_empty(), rest.is_empty()) {
        (true, _) => rest,
        (_, true) => first.to_string(),
        _ => format!("{} {}", first, rest),
    }
}

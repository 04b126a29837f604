/*!
 * Fragment stitching.
 *
 * Speech recognisers and translators both like to cut sentences in odd
 * places. Before translation, source fragments that clearly continue the
 * previous entry are joined so the model sees whole clauses. After
 * translation, adjacent entries whose continuation score is high enough
 * are joined the same way.
 */

use std::sync::Arc;

use crate::app_config::MergeConfig;
use crate::subtitle::SubtitleEntry;
use crate::translation::continuity::ContinuityClassifier;
use crate::translation::merge::join_with_overlap;

/// How aggressively to join fragments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchMode {
    /// Join only when the next entry visibly continues the previous one
    Fragments,
    /// Join whenever the continuation score reaches the threshold
    Semantic,
}

#[derive(Debug, Clone)]
pub struct Stitcher {
    classifier: Arc<dyn ContinuityClassifier>,
    max_gap_secs: f64,
    max_chars: usize,
    min_score: f64,
}

impl Stitcher {
    pub fn new(classifier: Arc<dyn ContinuityClassifier>, config: &MergeConfig) -> Self {
        Self {
            classifier,
            max_gap_secs: config.max_continuation_gap_secs,
            max_chars: config.max_merged_chars,
            min_score: config.semantic_merge_threshold,
        }
    }

    /// Join fragments; returns the stitched entries and the number of joins
    pub fn stitch(&self, entries: Vec<SubtitleEntry>, mode: StitchMode) -> (Vec<SubtitleEntry>, usize) {
        let mut out: Vec<SubtitleEntry> = Vec::with_capacity(entries.len());
        let mut joins = 0;

        for entry in entries {
            match out.last_mut() {
                Some(last) if self.should_join(last, &entry, mode) => {
                    last.text = join_with_overlap(&last.text, &entry.text);
                    last.end = last.end.max(entry.end);
                    joins += 1;
                }
                _ => out.push(entry),
            }
        }

        (out, joins)
    }

    fn should_join(&self, prev: &SubtitleEntry, next: &SubtitleEntry, mode: StitchMode) -> bool {
        if next.start - prev.end > self.max_gap_secs {
            return false;
        }
        if prev.char_count() + next.char_count() + 1 > self.max_chars {
            return false;
        }
        if self.classifier.ends_sentence(&prev.text) {
            return false;
        }

        let score = self.classifier.continuation_score(&prev.text, &next.text);
        match mode {
            StitchMode::Fragments => {
                self.classifier.starts_with_continuation(&next.text) && score >= self.min_score
            }
            StitchMode::Semantic => score >= self.min_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::continuity::HeuristicClassifier;

    fn stitcher() -> Stitcher {
        Stitcher::new(Arc::new(HeuristicClassifier::new()), &MergeConfig::default())
    }

    #[test]
    fn test_stitch_fragments_shouldJoinVisibleContinuation() {
        let (out, joins) = stitcher().stitch(
            vec![
                SubtitleEntry::new(0.0, 1.0, "I was walking home"),
                SubtitleEntry::new(1.2, 2.5, "...when the lights went out."),
                SubtitleEntry::new(3.0, 4.0, "Nobody moved."),
            ],
            StitchMode::Fragments,
        );

        assert_eq!(joins, 1);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "I was walking home when the lights went out.");
        assert_eq!(out[0].end, 2.5);
    }

    #[test]
    fn test_stitch_semantic_shouldJoinDanglingConnective() {
        let input = vec![
            SubtitleEntry::new(0.0, 1.0, "We packed the car and"),
            SubtitleEntry::new(1.1, 2.0, "Drove north for hours."),
        ];

        let (fragments, _) = stitcher().stitch(input.clone(), StitchMode::Fragments);
        assert_eq!(fragments.len(), 2);

        let (semantic, joins) = stitcher().stitch(input, StitchMode::Semantic);
        assert_eq!(joins, 1);
        assert_eq!(semantic[0].text, "We packed the car and Drove north for hours.");
    }

    #[test]
    fn test_stitch_shouldRespectGap() {
        let (out, joins) = stitcher().stitch(
            vec![
                SubtitleEntry::new(0.0, 1.0, "I was walking home"),
                SubtitleEntry::new(9.0, 10.0, "...when the lights went out."),
            ],
            StitchMode::Fragments,
        );
        assert_eq!(joins, 0);
        assert_eq!(out.len(), 2);
    }
}

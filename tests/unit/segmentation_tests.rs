/*!
 * Tests for the segmentation engine through the public API
 */

use subflow::SubtitleEntry;
use subflow::app_config::SegmentationConfig;
use subflow::translation::Segmenter;

use crate::common::sample_entries;

fn assert_contiguous(segments: &[subflow::translation::Segment], n: usize) {
    assert_eq!(segments.first().map(|s| s.start_index), Some(0));
    assert_eq!(segments.last().map(|s| s.end_index), Some(n));
    for (i, pair) in segments.windows(2).enumerate() {
        assert_eq!(pair[0].end_index, pair[1].start_index, "gap after segment {}", i);
    }
    for (i, segment) in segments.iter().enumerate() {
        assert_eq!(segment.index, i);
        assert!(!segment.is_empty());
    }
}

#[test]
fn test_segment_withTwoMinutesOfDialogue_shouldProduceTwoOrThreeSegments() {
    let entries = sample_entries(45, 120.0);
    let segments = Segmenter::new(SegmentationConfig::default()).segment(&entries);

    assert!((2..=3).contains(&segments.len()), "got {} segments", segments.len());
    assert_contiguous(&segments, entries.len());
    for segment in &segments {
        assert_eq!(segment.entries, entries[segment.start_index..segment.end_index].to_vec());
        assert!(segment.confidence >= 0.0 && segment.confidence <= 100.0);
    }
}

#[test]
fn test_segment_sameInputTwice_shouldMatchExactly() {
    let segmenter = Segmenter::new(SegmentationConfig::default());
    let entries = sample_entries(310, 900.0);

    let first = segmenter.segment(&entries);
    let second = segmenter.segment(&entries);
    assert_eq!(first, second);
    assert_contiguous(&first, entries.len());
}

#[test]
fn test_segment_withSceneChanges_shouldCutAtSilences() {
    let mut entries = sample_entries(60, 150.0);
    // Two scene changes: long silences before entries 20 and 40
    for (i, entry) in entries.iter_mut().enumerate() {
        let shift = if i >= 40 { 20.0 } else if i >= 20 { 10.0 } else { 0.0 };
        entry.start += shift;
        entry.end += shift;
    }

    let segments = Segmenter::new(SegmentationConfig::default()).segment(&entries);
    let starts: Vec<usize> = segments.iter().map(|s| s.start_index).collect();
    assert!(starts.contains(&20) || starts.contains(&40), "boundaries: {:?}", starts);
    assert_contiguous(&segments, entries.len());
}

#[test]
fn test_segment_withDurationLimit_shouldBoundSegmentSpan() {
    let config = SegmentationConfig {
        max_segment_duration_secs: 30.0,
        ..SegmentationConfig::default()
    };
    let entries = sample_entries(28, 140.0);
    let segments = Segmenter::new(config).segment(&entries);

    assert!(segments.len() > 1);
    for segment in &segments {
        assert!(segment.duration <= 30.0 || segment.len() == 1);
    }
    assert_contiguous(&segments, entries.len());
}

#[test]
fn test_segment_withSingleEntry_shouldReturnIt() {
    let entries = vec![SubtitleEntry::new(0.0, 2.0, "Alone on stage.")];
    let segments = Segmenter::new(SegmentationConfig::default()).segment(&entries);
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].entries, entries);
}

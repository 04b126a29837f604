/*!
 * Tests for merging segment results
 */

use subflow::SubtitleEntry;
use subflow::app_config::MergeConfig;
use subflow::translation::ResultMerger;

fn merger() -> ResultMerger {
    ResultMerger::new(MergeConfig::default())
}

#[test]
fn test_merge_withOutOfOrderSegments_shouldSortByTime() {
    let first = vec![
        SubtitleEntry::new(0.0, 2.0, "Le bateau quitte le port."),
        SubtitleEntry::new(3.0, 5.0, "Il pleut depuis ce matin."),
    ];
    let second = vec![
        SubtitleEntry::new(6.0, 8.0, "Les enfants dorment encore."),
        SubtitleEntry::new(9.0, 11.0, "Personne ne parle du voyage."),
    ];

    let merged = merger().merge(vec![(1, second), (0, first)]);
    let starts: Vec<f64> = merged.iter().map(|e| e.start).collect();
    assert_eq!(starts, vec![0.0, 3.0, 6.0, 9.0]);
}

#[test]
fn test_merge_withDuplicateAtBoundary_shouldKeepOneEntry() {
    let first = vec![
        SubtitleEntry::new(0.0, 2.0, "Le bateau quitte le port."),
        SubtitleEntry::new(3.0, 5.0, "Nous partirons demain matin."),
    ];
    let second = vec![
        SubtitleEntry::new(5.2, 6.5, "Nous partirons demain matin !"),
        SubtitleEntry::new(8.0, 10.0, "Personne ne parle du voyage."),
    ];

    let (merged, report) = merger().merge_with_report(vec![(0, first), (1, second)]);
    assert_eq!(merged.len(), 3);
    assert_eq!(report.deduplicated, 1);
    assert_eq!(merged[1].start, 3.0);
    assert_eq!(merged[1].end, 6.5);
    assert_eq!(merged[1].text, "Nous partirons demain matin !");
}

#[test]
fn test_merge_withOverlap_shouldClampEarlierEnd() {
    let first = vec![SubtitleEntry::new(0.0, 4.0, "Le bateau quitte le port.")];
    let second = vec![SubtitleEntry::new(3.0, 5.0, "Personne ne parle du voyage.")];

    let (merged, report) = merger().merge_with_report(vec![(0, first), (1, second)]);
    assert_eq!(report.clamped, 1);
    assert!(merged[0].end < merged[1].start);
    assert!(merged[0].end >= merged[0].start);
}

#[test]
fn test_merge_shouldNeverGrowTheTrack() {
    let segments: Vec<(i64, Vec<SubtitleEntry>)> = (0..4)
        .map(|s| {
            let entries = (0..5)
                .map(|i| {
                    let start = (s * 5 + i) as f64 * 2.0;
                    SubtitleEntry::new(start, start + 1.5, format!("Phrase numero {} du segment {}.", i, s))
                })
                .collect();
            (s as i64, entries)
        })
        .collect();

    let merged = merger().merge(segments);
    assert!(merged.len() <= 20);
    assert_eq!(merged.first().map(|e| e.start), Some(0.0));
    for pair in merged.windows(2) {
        assert!(pair[0].start <= pair[1].start);
        assert!(pair[0].end <= pair[1].start);
    }
}

/*!
 * Readability proxy for translated subtitles.
 *
 * Two cheap signals per entry: reading speed in characters per second and
 * the length of the longest line. Both are scored in 0..1 and averaged.
 */

use crate::subtitle::SubtitleEntry;

/// Characters per second of an entry; zero-length entries count as instant
pub fn chars_per_second(entry: &SubtitleEntry) -> f64 {
    let duration = entry.duration();
    if duration <= 0.0 {
        return f64::INFINITY;
    }
    entry.char_count() as f64 / duration
}

/// Longest line of an entry, in characters
pub fn longest_line(text: &str) -> usize {
    text.lines().map(|l| l.chars().count()).max().unwrap_or(0)
}

/// Readability of one entry in 0..1
pub fn entry_readability(entry: &SubtitleEntry, max_cps: f64, max_line_chars: usize) -> f64 {
    let cps = chars_per_second(entry);
    let speed = if cps <= max_cps { 1.0 } else { (max_cps / cps).clamp(0.0, 1.0) };

    let line = longest_line(&entry.text);
    let length = if line <= max_line_chars || line == 0 {
        1.0
    } else {
        max_line_chars as f64 / line as f64
    };

    (speed + length) / 2.0
}

/// Mean readability over all entries; `None` for an empty track
pub fn readability_score(entries: &[SubtitleEntry], max_cps: f64, max_line_chars: usize) -> Option<f64> {
    if entries.is_empty() {
        return None;
    }
    let total: f64 = entries
        .iter()
        .map(|e| entry_readability(e, max_cps, max_line_chars))
        .sum();
    Some(total / entries.len() as f64)
}

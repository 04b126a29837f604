/*!
 * Subtitle entry model shared by every stage of the pipeline.
 *
 * Timing is expressed in seconds, matching what content sources hand over.
 */

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

// @struct: Single subtitle entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleEntry {
    // @field: Start time in seconds
    pub start: f64,

    // @field: End time in seconds
    pub end: f64,

    // @field: Subtitle text
    pub text: String,
}

impl SubtitleEntry {
    /// Creates a new subtitle entry
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    // @creates: Validated subtitle entry
    // @validates: Finite, ordered time range and non-empty text
    pub fn new_validated(start: f64, end: f64, text: &str) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(anyhow!("Non-finite timing: {} -> {}", start, end));
        }

        if end < start {
            return Err(anyhow!("Invalid time range: end {} < start {}", end, start));
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("Empty subtitle text at {}", start));
        }

        Ok(Self::new(start, end, trimmed))
    }

    /// Duration of the entry in seconds
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Number of characters (not bytes) in the text
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }

    /// Copy of this entry carrying different text but the same timing
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            start: self.start,
            end: self.end,
            text: text.into(),
        }
    }

    /// Format a time in seconds as an SRT-style timestamp (HH:MM:SS,mmm)
    pub fn format_timestamp(seconds: f64) -> String {
        let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let secs = (total_ms % 60_000) / 1_000;
        let millis = total_ms % 1_000;

        format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
    }
}

impl fmt::Display for SubtitleEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} --> {}",
            Self::format_timestamp(self.start),
            Self::format_timestamp(self.end)
        )?;
        writeln!(f, "{}", self.text)
    }
}

/// Total number of characters across entries
pub fn total_chars(entries: &[SubtitleEntry]) -> usize {
    entries.iter().map(SubtitleEntry::char_count).sum()
}

/// Rough token estimate used for segment sizing (about four characters per token)
pub fn estimate_tokens(entries: &[SubtitleEntry]) -> usize {
    let chars = total_chars(entries);
    chars.div_ceil(4) + entries.len()
}

/// Time span covered by a slice of entries
pub fn span_duration(entries: &[SubtitleEntry]) -> f64 {
    match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => (last.end - first.start).max(0.0),
        _ => 0.0,
    }
}

/*!
 * Continuity classification for subtitle text.
 *
 * Segmentation, merging and stitching all need to answer the same questions
 * about a pair of neighbouring lines: does the first one close a sentence,
 * does the second one open a new topic, is the first one left hanging on a
 * connective. The `ContinuityClassifier` trait keeps those rules swappable;
 * `HeuristicClassifier` is the default lexicon and regex based strategy.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::Debug;

/// Strategy used to judge sentence and clause boundaries between entries
pub trait ContinuityClassifier: Send + Sync + Debug {
    /// Text ends with sentence-final punctuation
    fn ends_sentence(&self, text: &str) -> bool;

    /// Text opens with a paragraph or topic transition marker
    fn is_topic_transition(&self, text: &str) -> bool;

    /// Text reads as a question
    fn is_question(&self, text: &str) -> bool;

    /// Text ends on a connective or comma that expects more to follow
    fn ends_with_dangling_connective(&self, text: &str) -> bool;

    /// Text opens like the continuation of a previous clause
    fn starts_with_continuation(&self, text: &str) -> bool;

    /// Score in [0, 1] for how natural a break between `prev` and `next` is
    fn semantic_break_score(&self, prev: &str, next: &str) -> f64 {
        let mut score = 0.0;

        if self.ends_sentence(prev) {
            score += 0.5;
        }

        if self.is_topic_transition(next) {
            score += 0.3;
        }

        // Question/statement alternation hints at a speaker change
        if self.is_question(prev) != self.is_question(next) {
            score += 0.2;
        }

        if self.starts_with_continuation(next) {
            score -= 0.3;
        }

        f64::clamp(score, 0.0, 1.0)
    }

    /// Score in [0, 1] for how strongly `next` continues the clause left open by `prev`
    fn continuation_score(&self, prev: &str, next: &str) -> f64 {
        if self.ends_sentence(prev) {
            return 0.0;
        }

        let mut score = 0.1;

        if self.ends_with_dangling_connective(prev) {
            score += 0.4;
        }

        if self.starts_with_continuation(next) {
            score += 0.5;
        }

        f64::min(score, 1.0)
    }
}

static TERMINATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?。！？…]["'”’)\]]*\s*$"#).unwrap());

static TRAILING_ELLIPSIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\.\.\.|…)\s*$").unwrap());

static LEADING_ELLIPSIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\.\.\.|…)").unwrap());

static QUESTION: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[?？]["'”’)\]]*\s*$"#).unwrap());

const TOPIC_MARKERS: &[&str] = &[
    "so",
    "now",
    "next",
    "anyway",
    "okay",
    "ok",
    "alright",
    "first",
    "firstly",
    "second",
    "finally",
    "meanwhile",
    "however",
    "in conclusion",
    "moving on",
    "let's",
    "today",
    "welcome",
];

const CONNECTIVES: &[&str] = &[
    "and", "but", "or", "so", "because", "then", "the", "a", "an", "to", "of", "with", "that",
    "which", "who", "if", "when", "while", "for", "in", "on", "at", "as", "than", "like", "my",
    "your", "our", "their", "is", "are", "was",
];

const CONTINUATION_STARTERS: &[&str] = &[
    "and", "but", "or", "then", "because", "which", "who", "that", "so", "than", "to", "of",
];

/// Default classifier built from English lexical markers and punctuation
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    /// Create a new heuristic classifier
    pub fn new() -> Self {
        Self
    }

    fn first_words(text: &str, count: usize) -> String {
        text.split_whitespace()
            .take(count)
            .map(normalize_word)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn last_word(text: &str) -> Option<String> {
        text.split_whitespace().last().map(normalize_word)
    }
}

/// Lowercase a word and strip surrounding punctuation (apostrophes kept)
pub fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
        .to_lowercase()
}

impl ContinuityClassifier for HeuristicClassifier {
    fn ends_sentence(&self, text: &str) -> bool {
        let trimmed = text.trim();
        !trimmed.is_empty() && TERMINATOR.is_match(trimmed) && !TRAILING_ELLIPSIS.is_match(trimmed)
    }

    fn is_topic_transition(&self, text: &str) -> bool {
        let one = Self::first_words(text, 1);
        let two = Self::first_words(text, 2);
        TOPIC_MARKERS.iter().any(|marker| *marker == one || *marker == two)
    }

    fn is_question(&self, text: &str) -> bool {
        QUESTION.is_match(text.trim())
    }

    fn ends_with_dangling_connective(&self, text: &str) -> bool {
        let trimmed = text.trim_end();
        if trimmed.ends_with(',') || trimmed.ends_with(';') || TRAILING_ELLIPSIS.is_match(trimmed) {
            return true;
        }

        match Self::last_word(trimmed) {
            Some(word) => CONNECTIVES.contains(&word.as_str()),
            None => false,
        }
    }

    fn starts_with_continuation(&self, text: &str) -> bool {
        let trimmed = text.trim_start();
        if LEADING_ELLIPSIS.is_match(trimmed) {
            return true;
        }

        match trimmed.chars().next() {
            Some(c) if c.is_lowercase() => return true,
            None => return false,
            _ => {}
        }

        let first = Self::first_words(trimmed, 1);
        CONTINUATION_STARTERS.contains(&first.as_str())
    }
}

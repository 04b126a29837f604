/*!
 * Keyword extraction for terminology consistency.
 *
 * Extracts, without any model calls:
 * - Character and place names (capitalized words that recur)
 * - Quoted phrases
 * - Frequent content words
 *
 * The keywords are passed to every later stage as consistency hints.
 */

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::app_config::EnhancementConfig;
use crate::subtitle::SubtitleEntry;

/// Capitalized words, optionally followed by a second capitalized word
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b").unwrap());

static QUOTED_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]{2,})""#).unwrap());

static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z'-]+").unwrap());

/// Capitalized words that are not names
const EXCLUDED_NAMES: &[&str] = &[
    "I", "The", "A", "An", "This", "That", "These", "Those", "It", "He", "She", "They", "We",
    "You", "My", "Your", "His", "Her", "Our", "Their", "What", "Who", "Where", "When", "Why",
    "How", "Yes", "No", "Oh", "Ah", "Hey", "Well", "Now", "Then", "Here", "There", "Please",
    "Thank", "Thanks", "Sorry", "Hello", "Hi", "Goodbye", "Bye", "Mr", "Mrs", "Ms", "Dr", "Sir",
    "OK", "Okay", "And", "But", "So", "Just", "Really", "Maybe", "Perhaps", "Good", "Let",
];

/// Lowercase words too common to be useful hints
const STOPWORDS: &[&str] = &[
    "about", "after", "again", "always", "another", "around", "because", "before", "being",
    "could", "didn't", "doesn't", "don't", "every", "going", "gonna", "great", "little",
    "maybe", "never", "nothing", "other", "people", "really", "right", "should", "something",
    "still", "thing", "things", "think", "those", "through", "today", "wanna", "where",
    "which", "while", "would", "yourself",
];

/// Minimum length for a frequent word to count as a content word
const MIN_CONTENT_WORD_LEN: usize = 6;

/// Heuristic keyword extractor
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    max_keywords: usize,
    min_occurrences: usize,
}

impl KeywordExtractor {
    pub fn new(max_keywords: usize, min_occurrences: usize) -> Self {
        Self {
            max_keywords,
            min_occurrences: min_occurrences.max(1),
        }
    }

    pub fn from_config(config: &EnhancementConfig) -> Self {
        Self::new(config.max_keywords, config.keyword_min_occurrences)
    }

    /// Extract keywords, most frequent first
    ///
    /// Names come before quoted phrases, which come before plain content
    /// words; ties are broken alphabetically so the output is stable.
    pub fn extract(&self, entries: &[SubtitleEntry]) -> Vec<String> {
        let mut names: HashMap<String, usize> = HashMap::new();
        let mut quoted: HashMap<String, usize> = HashMap::new();
        let mut words: HashMap<String, usize> = HashMap::new();

        for entry in entries {
            let text = &entry.text;

            for cap in NAME_PATTERN.captures_iter(text) {
                if let Some(name) = cap.get(1) {
                    let name = name.as_str();
                    if !is_excluded_name(name) {
                        *names.entry(name.to_string()).or_insert(0) += 1;
                    }
                }
            }

            for cap in QUOTED_PATTERN.captures_iter(text) {
                if let Some(phrase) = cap.get(1) {
                    *quoted.entry(phrase.as_str().trim().to_string()).or_insert(0) += 1;
                }
            }

            for word in WORD_PATTERN.find_iter(text) {
                let word = word.as_str();
                if word.chars().next().is_some_and(char::is_lowercase)
                    && word.len() >= MIN_CONTENT_WORD_LEN
                    && !STOPWORDS.contains(&word)
                {
                    *words.entry(word.to_string()).or_insert(0) += 1;
                }
            }
        }

        let mut seen = HashSet::new();
        let mut keywords = Vec::new();

        for group in [names, quoted, words] {
            for keyword in self.ranked(group) {
                if keywords.len() >= self.max_keywords {
                    return keywords;
                }
                if seen.insert(keyword.to_lowercase()) {
                    keywords.push(keyword);
                }
            }
        }

        keywords
    }

    fn ranked(&self, counts: HashMap<String, usize>) -> Vec<String> {
        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.min_occurrences)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().map(|(keyword, _)| keyword).collect()
    }
}

fn is_excluded_name(name: &str) -> bool {
    name.split_whitespace()
        .next()
        .is_some_and(|first| EXCLUDED_NAMES.contains(&first))
        || name.len() <= 2
}

/// Fraction of keywords that survive verbatim in the translated entries
///
/// Names and quoted terms are usually carried over unchanged, so this is a
/// cheap signal that terminology stayed consistent.
pub fn keyword_relevance(keywords: &[String], entries: &[SubtitleEntry]) -> Option<f64> {
    if keywords.is_empty() {
        return None;
    }

    let text = entries
        .iter()
        .map(|e| e.text.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    let preserved = keywords
        .iter()
        .filter(|k| text.contains(&k.to_lowercase()))
        .count();

    Some(preserved as f64 / keywords.len() as f64)
}

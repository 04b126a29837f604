/*!
 * Style adjustment of translated entries.
 *
 * The completion service rewrites each chunk for the configured formality
 * and tone; afterwards lines longer than `max_line_chars` are wrapped
 * locally so the limit holds regardless of what the model returned.
 */

use std::sync::Arc;

use crate::app_config::{Formality, StyleOptions};
use crate::errors::SegmentError;
use crate::providers::{CompletionService, RequestKind};
use crate::subtitle::SubtitleEntry;
use crate::translation::prompts::PromptBuilder;

use super::complete_in_chunks;
use super::readability::longest_line;

/// Contractions that read as casual in formal output
const CONTRACTIONS: &[&str] = &["n't", "'re", "'ll", "'ve", "'m", "gonna", "wanna"];

#[derive(Debug, Clone)]
pub struct StyleAdjuster {
    service: Arc<dyn CompletionService>,
    prompts: PromptBuilder,
    style: StyleOptions,
    chunk_size: usize,
}

impl StyleAdjuster {
    pub fn new(
        service: Arc<dyn CompletionService>,
        prompts: PromptBuilder,
        style: StyleOptions,
        chunk_size: usize,
    ) -> Self {
        Self {
            service,
            prompts: prompts.with_style(&style),
            style,
            chunk_size,
        }
    }

    /// Rewrite entries for the configured style and enforce the line limit
    pub async fn adjust(&self, entries: &[SubtitleEntry]) -> Result<Vec<SubtitleEntry>, SegmentError> {
        let adjusted = complete_in_chunks(
            self.service.as_ref(),
            &self.prompts,
            RequestKind::StyleAdjust,
            entries,
            self.chunk_size,
        )
        .await?;

        Ok(adjusted
            .into_iter()
            .map(|entry| {
                let wrapped = wrap_lines(&entry.text, self.style.max_line_chars);
                entry.with_text(wrapped)
            })
            .collect())
    }

    pub fn style(&self) -> &StyleOptions {
        &self.style
    }
}

/// Break lines longer than `max_chars` at the last space that fits
pub fn wrap_lines(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return text.to_string();
    }

    let mut lines = Vec::new();
    for line in text.lines() {
        let mut rest = line.trim();
        while rest.chars().count() > max_chars {
            let limit = rest
                .char_indices()
                .nth(max_chars)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            match rest[..limit].rfind(' ') {
                Some(split) if split > 0 => {
                    lines.push(rest[..split].trim_end().to_string());
                    rest = rest[split..].trim_start();
                }
                _ => break,
            }
        }
        lines.push(rest.to_string());
    }
    lines.join("\n")
}

/// How consistently entries follow the style options, in 0..1
pub fn style_consistency(entries: &[SubtitleEntry], style: &StyleOptions) -> f64 {
    if entries.is_empty() {
        return 1.0;
    }

    let total: f64 = entries
        .iter()
        .map(|entry| {
            let line = longest_line(&entry.text);
            let mut score = if line <= style.max_line_chars || line == 0 {
                1.0
            } else {
                style.max_line_chars as f64 / line as f64
            };

            if style.formality == Formality::Formal {
                let lower = entry.text.to_lowercase();
                if CONTRACTIONS.iter().any(|c| lower.contains(c)) {
                    score *= 0.5;
                }
            }
            score
        })
        .sum();

    total / entries.len() as f64
}

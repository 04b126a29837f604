/*!
 * Source text correction.
 *
 * Sends the source entries to the completion service in chunks and asks it
 * to fix recognition errors without translating. Every chunk must come back
 * with exactly as many entries as were sent.
 */

use std::sync::Arc;

use log::debug;

use crate::errors::SegmentError;
use crate::providers::{CompletionService, RequestKind};
use crate::subtitle::SubtitleEntry;
use crate::translation::prompts::PromptBuilder;

use super::complete_in_chunks;

/// Result of a correction pass
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionOutcome {
    pub entries: Vec<SubtitleEntry>,
    /// Number of entries whose text changed
    pub corrected: usize,
}

impl CorrectionOutcome {
    /// Share of entries left untouched, in 0..1
    pub fn quality(&self) -> f64 {
        if self.entries.is_empty() {
            return 1.0;
        }
        1.0 - self.corrected as f64 / self.entries.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct TextCorrector {
    service: Arc<dyn CompletionService>,
    prompts: PromptBuilder,
    chunk_size: usize,
}

impl TextCorrector {
    pub fn new(service: Arc<dyn CompletionService>, prompts: PromptBuilder, chunk_size: usize) -> Self {
        Self {
            service,
            prompts,
            chunk_size,
        }
    }

    pub async fn correct(&self, entries: &[SubtitleEntry]) -> Result<CorrectionOutcome, SegmentError> {
        let corrected_entries = complete_in_chunks(
            self.service.as_ref(),
            &self.prompts,
            RequestKind::Correct,
            entries,
            self.chunk_size,
        )
        .await?;

        let corrected = entries
            .iter()
            .zip(&corrected_entries)
            .filter(|(before, after)| before.text != after.text)
            .count();

        debug!("Corrected {} of {} source entries", corrected, entries.len());

        Ok(CorrectionOutcome {
            entries: corrected_entries,
            corrected,
        })
    }
}

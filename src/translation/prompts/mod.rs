/*!
 * Prompt construction for completion requests.
 *
 * This module provides:
 * - System prompt templates for translation, correction and style adjustment
 * - A builder producing JSON user prompts with keyword and style hints
 */

pub mod templates;

// Re-export main types
pub use templates::{PromptBuilder, PromptTemplate};

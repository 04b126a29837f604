/*!
 * Prompt templates for subtitle completion requests.
 *
 * Every request to the completion service is a system prompt rendered from
 * a template plus a user prompt that is itself a JSON document carrying the
 * entries, the number of entries expected back and any hints.
 */

use serde::Serialize;

use crate::app_config::StyleOptions;
use crate::language::language_name;
use crate::providers::{CompletionRequest, RequestKind};
use crate::subtitle::SubtitleEntry;

/// System prompt template with `{source_language}`/`{target_language}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Appended to every system prompt so the payload shape stays fixed.
    pub const OUTPUT_CONTRACT: &'static str = r#"

## Output Requirements
- Return ONLY a JSON array of objects shaped {"start": <seconds>, "end": <seconds>, "text": "<text>"}
- Return exactly as many objects as there are input entries, in the same order
- Copy start and end from the input unchanged
- Do not include any text outside the JSON structure"#;

    /// System prompt for the correction stage.
    pub const SOURCE_CORRECTOR: &'static str = r#"You are an expert {source_language} subtitle editor.
Fix transcription mistakes, punctuation and casing in each entry without changing its meaning.
Never merge, split, reorder or translate entries."#;

    /// System prompt for the style adjustment stage.
    pub const STYLE_EDITOR: &'static str = r#"You are an expert {target_language} subtitle editor.
Rewrite each entry to match the requested style while preserving its meaning.
Never merge, split or reorder entries."#;

    /// Create a new prompt template.
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Render the template with the given language names.
    pub fn render(&self, source_language: &str, target_language: &str) -> String {
        self.template
            .replace("{source_language}", source_language)
            .replace("{target_language}", target_language)
    }
}

/// Builds completion requests for one task's languages and hints.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    source_language: String,
    target_language: String,
    translator_template: PromptTemplate,
    keywords: Vec<String>,
    style: Option<StyleOptions>,
    temperature: f32,
}

impl PromptBuilder {
    /// Create a builder using `translator_template` as the translation system prompt.
    pub fn new(source_language: &str, target_language: &str, translator_template: &str) -> Self {
        Self {
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
            translator_template: PromptTemplate::new(translator_template),
            keywords: Vec::new(),
            style: None,
            temperature: 0.3,
        }
    }

    /// Keywords passed as consistency hints.
    pub fn with_keywords(mut self, keywords: &[String]) -> Self {
        self.keywords = keywords.to_vec();
        self
    }

    /// Style instructions for style adjustment requests.
    pub fn with_style(mut self, style: &StyleOptions) -> Self {
        self.style = Some(style.clone());
        self
    }

    /// Sampling temperature forwarded to the backend.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Build the system prompt for a request kind.
    pub fn system_prompt(&self, kind: RequestKind) -> String {
        let template = match kind {
            RequestKind::Translate => self.translator_template.clone(),
            RequestKind::Correct => PromptTemplate::new(PromptTemplate::SOURCE_CORRECTOR),
            RequestKind::StyleAdjust => PromptTemplate::new(PromptTemplate::STYLE_EDITOR),
        };

        let mut prompt = template.render(
            &language_name(&self.source_language),
            &language_name(&self.target_language),
        );
        prompt.push_str(PromptTemplate::OUTPUT_CONTRACT);
        prompt
    }

    /// Build the JSON user prompt for a request kind.
    pub fn user_prompt(&self, kind: RequestKind, entries: &[SubtitleEntry]) -> String {
        let payload = UserPayload {
            task: kind.task_name(),
            source_language: &self.source_language,
            target_language: &self.target_language,
            expected_count: entries.len(),
            keywords: (!self.keywords.is_empty()).then_some(self.keywords.as_slice()),
            style: match kind {
                RequestKind::StyleAdjust => self.style.as_ref().map(StyleInstructions::from),
                _ => None,
            },
            entries: entries
                .iter()
                .enumerate()
                .map(|(index, e)| PayloadEntry {
                    index,
                    start: e.start,
                    end: e.end,
                    text: &e.text,
                })
                .collect(),
        };

        serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string())
    }

    /// Build a full completion request.
    pub fn build(&self, kind: RequestKind, entries: &[SubtitleEntry]) -> CompletionRequest {
        CompletionRequest {
            kind,
            system_prompt: self.system_prompt(kind),
            user_prompt: self.user_prompt(kind, entries),
            entries: entries.to_vec(),
            expected_count: entries.len(),
            temperature: self.temperature,
        }
    }
}

#[derive(Serialize)]
struct UserPayload<'a> {
    task: &'static str,
    source_language: &'a str,
    target_language: &'a str,
    expected_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    keywords: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<StyleInstructions>,
    entries: Vec<PayloadEntry<'a>>,
}

#[derive(Serialize)]
struct PayloadEntry<'a> {
    index: usize,
    start: f64,
    end: f64,
    text: &'a str,
}

#[derive(Serialize)]
struct StyleInstructions {
    formality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tone: Option<String>,
    max_line_chars: usize,
}

impl From<&StyleOptions> for StyleInstructions {
    fn from(style: &StyleOptions) -> Self {
        Self {
            formality: style.formality.to_string(),
            tone: style.tone.clone(),
            max_line_chars: style.max_line_chars,
        }
    }
}

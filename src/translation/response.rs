/*!
 * Completion payload extraction and repair.
 *
 * Models rarely return a clean JSON document. Extraction walks a ladder of
 * increasingly forgiving strategies and stops at the first one that yields
 * a list of entries:
 *
 * 1. parse the whole response as JSON
 * 2. parse the body of a markdown code fence
 * 3. parse the outermost `[...]` or `{...}` slice
 * 4. parse that slice after syntactic repair (smart quotes, comments,
 *    trailing commas, unbalanced brackets)
 * 5. salvage individual `{...}` objects with regexes
 *
 * The result keeps `start`/`end` optional so the caller can decide how to
 * treat entries with missing or non-numeric timing.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::errors::SegmentError;

/// Keys under which an object may wrap the entry list
const WRAPPER_KEYS: &[&str] = &["entries", "subtitles", "translations"];

/// An entry as found in the completion payload, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub text: Option<String>,
}

static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[\]}])").unwrap());
static LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*//.*$").unwrap());
static BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());
static START_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""start"\s*:\s*"?(-?\d+(?:\.\d+)?)"?"#).unwrap());
static END_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""end"\s*:\s*"?(-?\d+(?:\.\d+)?)"?"#).unwrap());
static TEXT_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""text"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

/// Extract entries from a raw completion response
pub fn extract_entries(response: &str) -> Result<Vec<RawEntry>, SegmentError> {
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(SegmentError::Validation("Empty completion response".to_string()));
    }

    if let Some(entries) = parse_value(trimmed) {
        return Ok(entries);
    }

    if let Some(body) = fence_body(trimmed) {
        if let Some(entries) = parse_value(body) {
            debug!("Recovered completion payload from code fence");
            return Ok(entries);
        }
    }

    let slice = outermost_slice(trimmed);
    if let Some(slice) = slice {
        if let Some(entries) = parse_value(slice) {
            debug!("Recovered completion payload from outermost JSON slice");
            return Ok(entries);
        }

        let repaired = repair_json(slice);
        if let Some(entries) = parse_value(&repaired) {
            debug!("Recovered completion payload after syntactic repair");
            return Ok(entries);
        }
    }

    let salvaged = salvage_objects(trimmed);
    if !salvaged.is_empty() {
        debug!("Salvaged {} entries from malformed completion payload", salvaged.len());
        return Ok(salvaged);
    }

    Err(SegmentError::Validation(format!(
        "Could not extract entries from response: {}",
        preview(trimmed)
    )))
}

fn parse_value(text: &str) -> Option<Vec<RawEntry>> {
    let value: Value = serde_json::from_str(text).ok()?;
    entries_from_value(&value)
}

fn entries_from_value(value: &Value) -> Option<Vec<RawEntry>> {
    match value {
        Value::Array(items) => Some(items.iter().map(raw_entry).collect()),
        Value::Object(map) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return Some(items.iter().map(raw_entry).collect());
                }
            }
            if map.contains_key("text") {
                return Some(vec![raw_entry(value)]);
            }
            None
        }
        _ => None,
    }
}

fn raw_entry(value: &Value) -> RawEntry {
    match value {
        Value::Object(map) => RawEntry {
            start: map.get("start").and_then(number),
            end: map.get("end").and_then(number),
            text: map.get("text").and_then(|v| v.as_str()).map(str::to_string),
        },
        Value::String(text) => RawEntry {
            start: None,
            end: None,
            text: Some(text.clone()),
        },
        _ => RawEntry {
            start: None,
            end: None,
            text: None,
        },
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Body of the first markdown code fence, with or without a language tag
fn fence_body(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```").unwrap_or(body.len());
    Some(body[..end].trim())
}

/// Slice from the first opening bracket to the last matching closer
fn outermost_slice(text: &str) -> Option<&str> {
    let open = text.find(['[', '{'])?;
    let closer = if text[open..].starts_with('[') { ']' } else { '}' };
    match text.rfind(closer) {
        Some(close) if close > open => Some(&text[open..=close]),
        _ => Some(&text[open..]),
    }
}

/// Apply syntactic repairs to a nearly valid JSON document
pub fn repair_json(text: &str) -> String {
    let normalized = text
        .replace(['\u{201C}', '\u{201D}', '\u{201E}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    let without_blocks = BLOCK_COMMENT.replace_all(&normalized, "");
    let without_comments = LINE_COMMENT.replace_all(&without_blocks, "");
    let without_commas = TRAILING_COMMA.replace_all(&without_comments, "$1");

    balance_brackets(&without_commas)
}

/// Close any string and brackets left open at the end of the document
fn balance_brackets(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ']' | '}' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut repaired = text.trim_end().to_string();
    if in_string {
        repaired.push('"');
    }
    if repaired.ends_with(',') {
        repaired.pop();
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Pull entries out of individual objects when the document cannot be parsed
fn salvage_objects(text: &str) -> Vec<RawEntry> {
    OBJECT
        .find_iter(text)
        .filter_map(|m| {
            let object = m.as_str();
            let text_value = TEXT_FIELD
                .captures(object)
                .and_then(|c| c.get(1))
                .map(|m| unescape(m.as_str()))?;

            Some(RawEntry {
                start: capture_number(&START_FIELD, object),
                end: capture_number(&END_FIELD, object),
                text: Some(text_value),
            })
        })
        .collect()
}

fn capture_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(120).collect();
    if text.chars().count() > 120 {
        preview.push_str("...");
    }
    preview
}

/*!
 * Subtitle content sources.
 *
 * A `ContentSource` turns a `VideoRecord` into the subtitle entries to
 * translate. `JsonFileSource` reads the video's `source_uri` as a JSON
 * array of `{start, end, text}` objects; `StaticSource` serves entries
 * registered in memory.
 */

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;

use crate::database::VideoRecord;
use crate::errors::SourceError;
use crate::subtitle::SubtitleEntry;

/// Where subtitle entries for a video come from
#[async_trait]
pub trait ContentSource: Send + Sync + Debug {
    /// Fetch the entries to translate for `video`
    async fn fetch_subtitles(&self, video: &VideoRecord) -> Result<Vec<SubtitleEntry>, SourceError>;
}

/// Check timing sanity and reject empty transcripts
fn validate(video: &VideoRecord, entries: Vec<SubtitleEntry>) -> Result<Vec<SubtitleEntry>, SourceError> {
    if entries.is_empty() {
        return Err(SourceError::NoTranscript {
            video_id: video.id.clone(),
            reason: "the source contains no subtitle entries".to_string(),
        });
    }

    for (i, entry) in entries.iter().enumerate() {
        if !entry.start.is_finite() || !entry.end.is_finite() || entry.start < 0.0 || entry.end < entry.start {
            return Err(SourceError::Unreadable(format!(
                "entry {} has invalid timing {:.3} -> {:.3}",
                i, entry.start, entry.end
            )));
        }
    }

    Ok(entries)
}

/// Reads a JSON array of entries from the path in `source_uri`
#[derive(Debug, Clone, Default)]
pub struct JsonFileSource;

impl JsonFileSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContentSource for JsonFileSource {
    async fn fetch_subtitles(&self, video: &VideoRecord) -> Result<Vec<SubtitleEntry>, SourceError> {
        let content = match tokio::fs::read_to_string(&video.source_uri).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NoTranscript {
                    video_id: video.id.clone(),
                    reason: format!("subtitle file not found: {}", video.source_uri),
                });
            }
            Err(e) => {
                return Err(SourceError::Unreadable(format!("{}: {}", video.source_uri, e)));
            }
        };

        let entries: Vec<SubtitleEntry> = serde_json::from_str(&content)
            .map_err(|e| SourceError::Unreadable(format!("{}: {}", video.source_uri, e)))?;

        debug!("Read {} entries from {}", entries.len(), video.source_uri);
        validate(video, entries)
    }
}

/// In-memory source keyed by video id
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    entries: Arc<RwLock<HashMap<String, Vec<SubtitleEntry>>>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the entries of a video
    pub fn insert(&self, video_id: &str, entries: Vec<SubtitleEntry>) {
        self.entries.write().insert(video_id.to_string(), entries);
    }

    pub fn remove(&self, video_id: &str) -> Option<Vec<SubtitleEntry>> {
        self.entries.write().remove(video_id)
    }
}

#[async_trait]
impl ContentSource for StaticSource {
    async fn fetch_subtitles(&self, video: &VideoRecord) -> Result<Vec<SubtitleEntry>, SourceError> {
        let entries = self.entries.read().get(&video.id).cloned();
        match entries {
            Some(entries) => validate(video, entries),
            None => Err(SourceError::NoTranscript {
                video_id: video.id.clone(),
                reason: "no subtitles registered for this video".to_string(),
            }),
        }
    }
}

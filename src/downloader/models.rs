// Common data models for the download pipeline

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Normalized search/listing result served to clients.
///
/// Flat extraction may leave `thumbnail` or `url` empty; the catalog adapter
/// synthesizes them from the id before a summary ever leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSummary {
    pub id: String,
    pub title: String,
    pub thumbnail: String,
    pub url: String,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
}

/// One raw entry from the engine's flat listing mode.
///
/// Everything is optional because shallow extraction skips per-item
/// resolution for speed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlatEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub url: Option<String>,
    pub webpage_url: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
}

/// Full metadata for a single item, from the engine's deep extraction.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaMetadata {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
}

/// Target audio codec for the transcode branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Mp3,
    M4a,
    Wav,
}

impl AudioCodec {
    pub fn ext(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Wav => "wav",
        }
    }
}

/// What the client asked us to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatChoice {
    /// Cover image only, no media transcode.
    Thumbnail,
    /// Best audio source, transcoded to the given codec.
    Audio(AudioCodec),
    /// Best combined video+audio, normalized to mp4.
    Video,
}

impl FormatChoice {
    /// Anything that is not a recognized audio codec or `thumbnail` falls
    /// back to the video branch, matching the permissive request format.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "thumbnail" => Self::Thumbnail,
            "mp3" => Self::Audio(AudioCodec::Mp3),
            "m4a" => Self::Audio(AudioCodec::M4a),
            "wav" => Self::Audio(AudioCodec::Wav),
            _ => Self::Video,
        }
    }
}

/// Phase of a job's progress entry.
///
/// Once a terminal phase is written no further overwrite is meaningful and
/// the registry entry is eligible for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Downloading,
    Finishing,
    Error,
    Cancelled,
    Sent,
}

impl ProgressPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Cancelled | Self::Sent)
    }
}

/// Latest progress for one client session. Overwritten on every engine
/// callback; only the newest value matters, no history is kept.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub phase: ProgressPhase,
    pub detail: String,
}

impl JobProgress {
    pub fn downloading(detail: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Downloading,
            detail: detail.into(),
        }
    }

    pub fn finishing(detail: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Finishing,
            detail: detail.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Error,
            detail: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            phase: ProgressPhase::Cancelled,
            detail: "Download cancelled by user.".to_string(),
        }
    }

    pub fn sent() -> Self {
        Self {
            phase: ProgressPhase::Sent,
            detail: "Transfer complete!".to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.detail
    }
}

/// Fixed extension-to-MIME table for served files.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("wav") => "audio/wav",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

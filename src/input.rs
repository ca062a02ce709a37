use lofty::prelude::*;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::model::AudioMetadata;
use crate::recorder::Recording;

#[derive(Error, Debug)]
pub enum InputError {
    #[error("File is too large ({size_mb:.1} MB); the limit is {limit_mb:.1} MB")]
    TooLarge { size_mb: f64, limit_mb: f64 },
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("Not a usable audio link: {0}")]
    InvalidUrl(String),
    #[error("Nothing was recorded")]
    EmptyRecording,
    #[error("Microphone unavailable: {0}")]
    Microphone(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

/// Audio ready to be sent to the model: either the bytes themselves or a
/// link the model is asked to fetch. Inline bytes are shared, not copied.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioInput {
    Inline { bytes: Arc<[u8]>, mime_type: String },
    Url(String),
}

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// MIME type for a supported audio file extension.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_lowercase().as_str() {
        "mp3" => Some("audio/mpeg"),
        "wav" => Some("audio/wav"),
        "flac" => Some("audio/flac"),
        "ogg" | "oga" => Some("audio/ogg"),
        "opus" => Some("audio/opus"),
        "m4a" | "mp4" => Some("audio/mp4"),
        "aac" => Some("audio/aac"),
        "aif" | "aiff" => Some("audio/aiff"),
        "webm" => Some("audio/webm"),
        _ => None,
    }
}

/// Load a local audio file, rejecting it before reading if it exceeds
/// `max_bytes`.
pub fn load_file(path: &Path, max_bytes: u64) -> Result<(AudioInput, AudioMetadata), InputError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let mime_type = mime_for_extension(ext)
        .ok_or_else(|| InputError::UnsupportedFormat(path.display().to_string()))?;

    let size = std::fs::metadata(path)?.len();
    if size > max_bytes {
        return Err(InputError::TooLarge {
            size_mb: size as f64 / BYTES_PER_MB,
            limit_mb: max_bytes as f64 / BYTES_PER_MB,
        });
    }

    let bytes = std::fs::read(path)?;
    let metadata = AudioMetadata {
        file_name: path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default(),
        mime_type: mime_type.to_string(),
        duration: probe_duration(path),
        size_bytes: size,
    };
    log::info!(
        "Loaded {} ({:.1} MB, {:.1}s)",
        metadata.file_name,
        size as f64 / BYTES_PER_MB,
        metadata.duration
    );

    Ok((
        AudioInput::Inline {
            bytes: bytes.into(),
            mime_type: mime_type.to_string(),
        },
        metadata,
    ))
}

/// Accept an http(s) link as input. Nothing is downloaded locally.
pub fn from_url(url: &str) -> Result<(AudioInput, AudioMetadata), InputError> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| InputError::InvalidUrl(url.to_string()))?;
    if rest.is_empty() || rest.starts_with('/') || url.contains(char::is_whitespace) {
        return Err(InputError::InvalidUrl(url.to_string()));
    }

    let file_name = rest
        .split(['?', '#'])
        .next()
        .and_then(|p| p.rsplit('/').find(|s| !s.is_empty()))
        .unwrap_or(rest)
        .to_string();

    Ok((
        AudioInput::Url(url.to_string()),
        AudioMetadata {
            file_name,
            mime_type: "text/uri-list".to_string(),
            duration: 0.0,
            size_bytes: 0,
        },
    ))
}

/// Wrap a finished microphone recording.
pub fn from_recording(recording: Recording) -> (AudioInput, AudioMetadata) {
    let metadata = AudioMetadata {
        file_name: format!("recording-{}.wav", chrono::Local::now().format("%Y%m%d-%H%M%S")),
        mime_type: "audio/wav".to_string(),
        duration: recording.duration,
        size_bytes: recording.wav.len() as u64,
    };
    (
        AudioInput::Inline {
            bytes: recording.wav.into(),
            mime_type: "audio/wav".to_string(),
        },
        metadata,
    )
}

/// Duration in seconds from the container headers. Returns 0.0 when the file
/// can't be probed; the analysis still runs without it.
pub fn probe_duration(path: &Path) -> f64 {
    match lofty::read_from_path(path) {
        Ok(tagged) => {
            let secs = tagged.properties().duration().as_secs_f64();
            if secs > 0.0 { secs } else { 0.0 }
        }
        Err(e) => {
            log::warn!("Could not read duration of {}: {}", path.display(), e);
            0.0
        }
    }
}

#![forbid(unsafe_code)]

//! Turns a downloaded subtitle payload into a Markdown transcript.
//!
//! The payload is the platform's subtitle JSON (`{"body": [{"from", "to",
//! "content"}, ...]}`). Each entry becomes a `## MM:SS` heading (or
//! `## HH:MM:SS` past the first hour) followed by its text.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

/// Characters that are not allowed in file names on at least one platform.
pub const UNSAFE_FILENAME_CHARS: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];
pub const FILE_STEM_LIMIT: usize = 50;
pub const ARTIFACT_EXTENSION: &str = "md";

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    /// Start offset in seconds.
    pub from: f64,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtitleDocument {
    pub entries: Vec<SubtitleEntry>,
}

#[derive(Deserialize)]
struct RawPayload {
    body: Vec<Value>,
}

#[derive(Deserialize)]
struct RawEntry {
    from: Offset,
    content: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Offset {
    Seconds(f64),
    Stamp(String),
}

impl Offset {
    fn seconds(&self) -> Option<f64> {
        match self {
            Offset::Seconds(seconds) => Some(*seconds),
            Offset::Stamp(stamp) => parse_timestamp(stamp),
        }
    }
}

impl SubtitleDocument {
    /// Reads the entry list out of a raw payload. Returns `None` when there is
    /// no `body` list at all; individual malformed entries are dropped.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let raw = RawPayload::deserialize(payload).ok()?;
        let entries = raw
            .body
            .iter()
            .filter_map(|item| RawEntry::deserialize(item).ok())
            .filter_map(|entry| {
                Some(SubtitleEntry {
                    from: entry.from.seconds()?,
                    content: entry.content,
                })
            })
            .collect();
        Some(Self { entries })
    }
}

/// Parses `HH:MM:SS,mmm` (the comma part optional) into seconds.
fn parse_timestamp(stamp: &str) -> Option<f64> {
    let (clock, millis) = match stamp.trim().split_once(',') {
        Some((clock, millis)) => (clock, millis.parse::<u32>().ok()?),
        None => (stamp.trim(), 0),
    };
    let mut parts = clock.split(':').map(|part| part.parse::<u64>().ok());
    let (Some(Some(hours)), Some(Some(minutes)), Some(Some(seconds)), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return None;
    };
    let total = hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?;
    Some(total as f64 + f64::from(millis) / 1000.0)
}

/// `MM:SS`, or `HH:MM:SS` from one hour on. Fractions are truncated.
pub fn format_timestamp(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    if total >= 3600 {
        format!(
            "{:02}:{:02}:{:02}",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    } else {
        format!("{:02}:{:02}", total / 60, total % 60)
    }
}

/// Renders the transcript, or `None` if the document has nothing to render.
pub fn render(document: &SubtitleDocument, video_title: &str) -> Option<String> {
    if document.entries.is_empty() {
        warn!(video_title, "subtitle document has no entries");
        return None;
    }
    let mut out = format!("# {video_title}\n\n");
    for entry in &document.entries {
        out.push_str(&format!(
            "## {}\n{}\n\n",
            format_timestamp(entry.from),
            entry.content.trim()
        ));
    }
    Some(out)
}

/// Replaces unsafe characters with `_` and caps the result at 50 characters.
pub fn sanitize_file_stem(title: &str) -> String {
    title
        .chars()
        .map(|c| if UNSAFE_FILENAME_CHARS.contains(&c) { '_' } else { c })
        .take(FILE_STEM_LIMIT)
        .collect()
}

pub fn artifact_file_name(video_title: &str) -> String {
    format!("{}.{ARTIFACT_EXTENSION}", sanitize_file_stem(video_title))
}

/// Writes the transcript next to its siblings via a temp file and rename, so
/// a crash never leaves a half-written artifact behind.
pub fn write_artifact(output_dir: &Path, video_title: &str, text: &str) -> Result<PathBuf> {
    let path = output_dir.join(artifact_file_name(video_title));
    let mut tmp = NamedTempFile::new_in(output_dir)
        .with_context(|| format!("Creating temp file in {}", output_dir.display()))?;
    tmp.write_all(text.as_bytes())
        .with_context(|| format!("Writing {}", path.display()))?;
    tmp.persist(&path)
        .with_context(|| format!("Persisting {}", path.display()))?;
    Ok(path)
}

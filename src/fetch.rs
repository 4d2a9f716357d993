#![forbid(unsafe_code)]

//! Per-video pipeline: metadata, subtitle list, language pick, download,
//! transcode. Stages run strictly in that order and the first failing stage
//! decides the [`FetchError`].

use crate::client::SubtitleApi;
use crate::metadata::SubtitleTrack;
use crate::transcode::{SubtitleDocument, render, write_artifact};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Label marker for Chinese tracks (`中文（中国）`, `中文（自动生成）`, ...).
pub const CHINESE_LABEL_MARKER: &str = "中文";
pub const CHINESE_LOCALE_CODE: &str = "zh-CN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    FetchingMetadata,
    FetchingTrackList,
    SelectingTrack,
    DownloadingPayload,
    Transcoding,
}

impl fmt::Display for FetchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FetchStage::FetchingMetadata => "fetching metadata",
            FetchStage::FetchingTrackList => "fetching track list",
            FetchStage::SelectingTrack => "selecting track",
            FetchStage::DownloadingPayload => "downloading payload",
            FetchStage::Transcoding => "transcoding",
        };
        f.write_str(label)
    }
}

/// Why a video ended without an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("metadata unavailable")]
    MetadataUnavailable,
    #[error("no subtitles")]
    NoSubtitles,
    #[error("no matching-language subtitle")]
    NoMatchingLanguage,
    #[error("subtitle download failed")]
    DownloadFailed,
    #[error("transcode failed: {0}")]
    TranscodeFailed(String),
}

impl FetchError {
    pub fn stage(&self) -> FetchStage {
        match self {
            FetchError::MetadataUnavailable => FetchStage::FetchingMetadata,
            FetchError::NoSubtitles => FetchStage::FetchingTrackList,
            FetchError::NoMatchingLanguage => FetchStage::SelectingTrack,
            FetchError::DownloadFailed => FetchStage::DownloadingPayload,
            FetchError::TranscodeFailed(_) => FetchStage::Transcoding,
        }
    }
}

/// First track labelled Chinese or coded `zh-CN`. Other languages are never
/// taken as a fallback.
pub fn select_track(tracks: &[SubtitleTrack]) -> Option<&SubtitleTrack> {
    tracks
        .iter()
        .find(|track| {
            track.label.contains(CHINESE_LABEL_MARKER) || track.code == CHINESE_LOCALE_CODE
        })
}

/// Fetches and renders the subtitles of one video into `output_dir`.
pub fn fetch_subtitle<A: SubtitleApi + ?Sized>(
    api: &A,
    video_id: &str,
    output_dir: &Path,
) -> Result<PathBuf, FetchError> {
    info!(video_id, "fetching subtitles");
    let result = run_stages(api, video_id, output_dir);
    match &result {
        Ok(path) => info!(video_id, path = %path.display(), "subtitles saved"),
        Err(err) => warn!(video_id, stage = %err.stage(), "aborted: {err}"),
    }
    result
}

fn run_stages<A: SubtitleApi + ?Sized>(
    api: &A,
    video_id: &str,
    output_dir: &Path,
) -> Result<PathBuf, FetchError> {
    let metadata = api
        .video_info(video_id)
        .ok_or(FetchError::MetadataUnavailable)?;
    let title = metadata.display_title(video_id);
    info!(video_id, title, "resolved video title");

    let tracks = api.subtitle_tracks(video_id);
    if tracks.is_empty() {
        return Err(FetchError::NoSubtitles);
    }

    let track = select_track(&tracks).ok_or(FetchError::NoMatchingLanguage)?;
    if track.url.trim().is_empty() {
        warn!(video_id, lan = %track.code, "selected track has no download URL");
        return Err(FetchError::DownloadFailed);
    }

    let payload = api
        .download_subtitle(&track.url)
        .ok_or(FetchError::DownloadFailed)?;

    let document = SubtitleDocument::from_payload(&payload).ok_or_else(|| {
        FetchError::TranscodeFailed("subtitle payload has no entry list".to_string())
    })?;
    let text = render(&document, title).ok_or_else(|| {
        FetchError::TranscodeFailed("subtitle payload has no entries".to_string())
    })?;
    write_artifact(output_dir, title, &text)
        .map_err(|err| FetchError::TranscodeFailed(format!("{err:#}")))
}

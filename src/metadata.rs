//! Records exchanged with the Bilibili web API.
//!
//! The deserialize side mirrors the JSON the platform returns; fields the
//! tools never read are left out and everything that may be absent on older
//! videos carries a default.

use serde::{Deserialize, Serialize};

/// `data` payload of `/x/web-interface/view`. Only the title is consumed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoMetadata {
    #[serde(default)]
    pub bvid: String,
    #[serde(default)]
    pub title: String,
}

impl VideoMetadata {
    /// Title used for the artifact, falling back to the id for untitled videos.
    pub fn display_title<'a>(&'a self, video_id: &'a str) -> &'a str {
        let title = self.title.trim();
        if title.is_empty() { video_id } else { title }
    }
}

/// One language variant listed by `/x/player/v2`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubtitleTrack {
    #[serde(rename = "lan", default)]
    pub code: String,
    #[serde(rename = "lan_doc", default)]
    pub label: String,
    #[serde(rename = "subtitle_url", alias = "url", default)]
    pub url: String,
}

/// Search hit after filtering: highlight markup removed, description clipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSearchResult {
    pub bvid: String,
    pub title: String,
    pub author: String,
    pub play_count: u64,
    pub description: String,
}

#![forbid(unsafe_code)]

//! Blocking client for the handful of Bilibili endpoints the tools need.
//!
//! Every call goes through the shared [`RateLimiter`], carries the session
//! cookies plus configured headers, and has a fixed 10 second timeout.
//! Failures never escape: they are logged and surface as an empty or absent
//! result, which is what the orchestrator expects.

use crate::config::{AppConfig, Credentials};
use crate::metadata::{SubtitleTrack, VideoMetadata};
use crate::rate_limit::RateLimiter;
use anyhow::Result;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const SEARCH_PATH: &str = "/x/web-interface/search/type";
pub const VIDEO_INFO_PATH: &str = "/x/web-interface/view";
pub const SUBTITLE_LIST_PATH: &str = "/x/player/v2";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Envelope `code` the platform uses for success.
const SUCCESS_CODE: i64 = 0;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
const DEFAULT_REFERER: &str = "https://www.bilibili.com";

/// The operations the fetch pipeline needs from the platform.
///
/// All of them fail soft; implementations log the reason themselves.
pub trait SubtitleApi {
    fn search(&self, keyword: &str, page: u32, page_size: u32) -> Vec<Value>;
    fn video_info(&self, video_id: &str) -> Option<VideoMetadata>;
    fn subtitle_tracks(&self, video_id: &str) -> Vec<SubtitleTrack>;
    fn download_subtitle(&self, url: &str) -> Option<Value>;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("platform returned code {code}: {message}")]
    Platform { code: i64, message: String },
    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

#[derive(Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct SearchData {
    #[serde(default)]
    result: Vec<Value>,
}

#[derive(Deserialize)]
struct PlayerData {
    #[serde(default)]
    subtitle: Option<SubtitleList>,
}

#[derive(Deserialize)]
struct SubtitleList {
    #[serde(default)]
    subtitles: Vec<SubtitleTrack>,
}

pub struct BiliClient {
    agent: ureq::Agent,
    api_base: String,
    cookie_header: String,
    headers: Vec<(String, String)>,
    limiter: RateLimiter,
}

impl BiliClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let limiter = RateLimiter::new(
            config.settings.request_delay_min,
            config.settings.request_delay_max,
        )?;
        Ok(Self::with_parts(
            &config.credentials,
            limiter,
            &config.settings.api_base,
        ))
    }

    /// Assembles a client from already validated pieces.
    pub fn with_parts(credentials: &Credentials, limiter: RateLimiter, api_base: &str) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        debug!(
            api_base,
            min_delay_ms = limiter.min_delay().as_millis() as u64,
            max_delay_ms = limiter.max_delay().as_millis() as u64,
            "api client ready"
        );
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            cookie_header: credentials.cookie_header(),
            headers: merge_headers(credentials.headers()),
            limiter,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn get_data<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let envelope: Envelope<T> = self.get_json(url, query)?;
        if envelope.code != SUCCESS_CODE {
            return Err(ApiError::Platform {
                code: envelope.code,
                message: if envelope.message.is_empty() {
                    "unknown error".to_string()
                } else {
                    envelope.message
                },
            });
        }
        envelope.data.ok_or_else(|| ApiError::Decode {
            url: url.to_string(),
            message: "envelope carries no data".to_string(),
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.limiter.acquire();

        let mut request = self.agent.get(url).set("Cookie", &self.cookie_header);
        for (name, value) in &self.headers {
            request = request.set(name, value);
        }
        for (name, value) in query {
            request = request.query(name, value);
        }

        let response = request.call().map_err(|err| match err {
            ureq::Error::Status(status, _) => ApiError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => ApiError::Transport {
                url: url.to_string(),
                message: transport.to_string(),
            },
        })?;

        response.into_json::<T>().map_err(|err| ApiError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

impl SubtitleApi for BiliClient {
    fn search(&self, keyword: &str, page: u32, page_size: u32) -> Vec<Value> {
        let query = [
            ("search_type", "video".to_string()),
            ("keyword", keyword.to_string()),
            ("page", page.to_string()),
            ("page_size", page_size.to_string()),
        ];
        match self.get_data::<SearchData>(&self.endpoint(SEARCH_PATH), &query) {
            Ok(data) => data.result,
            Err(err) => {
                warn!(keyword, page, "search failed: {err}");
                Vec::new()
            }
        }
    }

    fn video_info(&self, video_id: &str) -> Option<VideoMetadata> {
        let query = [("bvid", video_id.to_string())];
        match self.get_data::<VideoMetadata>(&self.endpoint(VIDEO_INFO_PATH), &query) {
            Ok(metadata) => Some(metadata),
            Err(err) => {
                warn!(video_id, "fetching video info failed: {err}");
                None
            }
        }
    }

    fn subtitle_tracks(&self, video_id: &str) -> Vec<SubtitleTrack> {
        let query = [("bvid", video_id.to_string())];
        match self.get_data::<PlayerData>(&self.endpoint(SUBTITLE_LIST_PATH), &query) {
            Ok(data) => data
                .subtitle
                .map(|list| list.subtitles)
                .unwrap_or_default(),
            Err(err) => {
                warn!(video_id, "fetching subtitle list failed: {err}");
                Vec::new()
            }
        }
    }

    fn download_subtitle(&self, url: &str) -> Option<Value> {
        let url = resolve_subtitle_url(url);
        match self.get_json::<Value>(&url, &[]) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!("subtitle download failed: {err}");
                None
            }
        }
    }
}

/// Subtitle links come back protocol-relative (`//aisubtitle.hdslb.com/...`).
pub fn resolve_subtitle_url(url: &str) -> String {
    let trimmed = url.trim();
    match trimmed.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => trimmed.to_string(),
    }
}

/// Browser-like defaults, overridden case-insensitively by configured headers.
fn merge_headers(configured: &BTreeMap<String, String>) -> Vec<(String, String)> {
    let mut headers = vec![
        ("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string()),
        ("Referer".to_string(), DEFAULT_REFERER.to_string()),
    ];
    for (name, value) in configured {
        if name.eq_ignore_ascii_case("cookie") {
            continue;
        }
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }
    headers
}

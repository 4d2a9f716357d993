//! Scripted stand-in for the platform API used by the pipeline tests.

use crate::client::SubtitleApi;
use crate::metadata::{SubtitleTrack, VideoMetadata};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeVideo {
    title: String,
    tracks: Vec<SubtitleTrack>,
    delay: Duration,
    panics: bool,
}

impl FakeVideo {
    pub(crate) fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub(crate) fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub(crate) fn with_track(mut self, track: SubtitleTrack) -> Self {
        self.tracks.push(track);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Default)]
pub(crate) struct FakeApi {
    search_pages: Vec<Vec<Value>>,
    videos: HashMap<String, FakeVideo>,
    payloads: HashMap<String, Value>,
    search_calls: Mutex<Vec<(String, u32, u32)>>,
    downloaded: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeApi {
    pub(crate) fn with_search_page(mut self, page: Vec<Value>) -> Self {
        self.search_pages.push(page);
        self
    }

    pub(crate) fn with_video(mut self, video_id: &str, video: FakeVideo) -> Self {
        self.videos.insert(video_id.to_string(), video);
        self
    }

    pub(crate) fn with_payload(mut self, url: &str, payload: Value) -> Self {
        self.payloads.insert(url.to_string(), payload);
        self
    }

    pub(crate) fn search_calls(&self) -> Vec<(String, u32, u32)> {
        self.search_calls.lock().clone()
    }

    pub(crate) fn downloaded_urls(&self) -> Vec<String> {
        self.downloaded.lock().clone()
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl SubtitleApi for FakeApi {
    fn search(&self, keyword: &str, page: u32, page_size: u32) -> Vec<Value> {
        self.search_calls
            .lock()
            .push((keyword.to_string(), page, page_size));
        page.checked_sub(1)
            .and_then(|index| self.search_pages.get(index as usize))
            .cloned()
            .unwrap_or_default()
    }

    fn video_info(&self, video_id: &str) -> Option<VideoMetadata> {
        let video = self.videos.get(video_id)?;
        if video.panics {
            panic!("simulated worker crash for {video_id}");
        }
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        thread::sleep(video.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Some(VideoMetadata {
            bvid: video_id.to_string(),
            title: video.title.clone(),
        })
    }

    fn subtitle_tracks(&self, video_id: &str) -> Vec<SubtitleTrack> {
        self.videos
            .get(video_id)
            .map(|video| video.tracks.clone())
            .unwrap_or_default()
    }

    fn download_subtitle(&self, url: &str) -> Option<Value> {
        self.downloaded.lock().push(url.to_string());
        self.payloads.get(url).cloned()
    }
}

pub(crate) fn track(code: &str, label: &str, url: &str) -> SubtitleTrack {
    SubtitleTrack {
        code: code.to_string(),
        label: label.to_string(),
        url: url.to_string(),
    }
}

pub(crate) fn payload(entries: &[(f64, &str)]) -> Value {
    let body: Vec<Value> = entries
        .iter()
        .map(|(from, content)| json!({ "from": from, "to": from + 1.0, "content": content }))
        .collect();
    json!({ "body": body })
}

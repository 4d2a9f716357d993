#![forbid(unsafe_code)]

//! Keyword search with a popularity floor.

use crate::client::SubtitleApi;
use crate::metadata::VideoSearchResult;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

pub const DESCRIPTION_LIMIT: usize = 100;

/// Raw search hit. `play` arrives as a number, but the platform sometimes
/// sends strings such as `"--"` for hidden counters.
#[derive(Deserialize)]
struct RawSearchEntry {
    bvid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    play: PlayCount,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PlayCount {
    Number(u64),
    Text(String),
}

impl Default for PlayCount {
    fn default() -> Self {
        PlayCount::Number(0)
    }
}

impl PlayCount {
    fn value(&self) -> Option<u64> {
        match self {
            PlayCount::Number(count) => Some(*count),
            PlayCount::Text(text) => text.trim().parse().ok(),
        }
    }
}

/// Keeps hits with at least `min_play_count` plays, in upstream order, up to
/// `max_results`. Entries that cannot be read are skipped.
pub fn filter_and_rank(
    raw_results: &[Value],
    min_play_count: u64,
    max_results: usize,
) -> Vec<VideoSearchResult> {
    let mut results = Vec::new();
    for raw in raw_results {
        if results.len() >= max_results {
            break;
        }
        let entry = match RawSearchEntry::deserialize(raw) {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable search entry: {err}");
                continue;
            }
        };
        let Some(play_count) = entry.play.value() else {
            debug!(bvid = %entry.bvid, "skipping search entry without a numeric play count");
            continue;
        };
        if play_count < min_play_count {
            continue;
        }
        results.push(VideoSearchResult {
            bvid: entry.bvid,
            title: strip_highlight(&entry.title),
            author: entry.author,
            play_count,
            description: truncate_chars(&entry.description, DESCRIPTION_LIMIT),
        });
    }
    results
}

/// Runs the search page by page until `max_results` hits pass the filter,
/// `pages` pages were read, or a page comes back empty.
pub fn search_videos<A: SubtitleApi + ?Sized>(
    api: &A,
    keyword: &str,
    min_play_count: u64,
    max_results: usize,
    pages: u32,
    page_size: u32,
) -> Vec<VideoSearchResult> {
    info!(keyword, min_play_count, max_results, "searching videos");
    let mut collected = Vec::new();
    for page in 1..=pages.max(1) {
        if collected.len() >= max_results {
            break;
        }
        let raw = api.search(keyword, page, page_size);
        if raw.is_empty() {
            break;
        }
        let remaining = max_results - collected.len();
        collected.extend(filter_and_rank(&raw, min_play_count, remaining));
    }
    info!(keyword, found = collected.len(), "search finished");
    collected
}

/// Removes the `<em class="keyword">…</em>` markers search titles carry.
pub fn strip_highlight(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut rest = title;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match highlight_tag_len(tail) {
            Some(len) => rest = &tail[len..],
            None => {
                out.push('<');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn highlight_tag_len(tail: &str) -> Option<usize> {
    if tail.starts_with("</em>") {
        return Some("</em>".len());
    }
    let after = tail.strip_prefix("<em")?;
    if !(after.starts_with('>') || after.starts_with(' ')) {
        return None;
    }
    after.find('>').map(|end| "<em".len() + end + 1)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use serde_json::json;

    fn hit(bvid: &str, play: u64) -> Value {
        json!({
            "bvid": bvid,
            "title": format!("<em class=\"keyword\">example</em> video {bvid}"),
            "author": "up",
            "play": play,
            "description": "d".repeat(150),
        })
    }

    #[test]
    fn filter_applies_threshold_and_cap() {
        let raw: Vec<Value> = [60_000, 10, 70_000, 80_000, 20, 90_000]
            .iter()
            .enumerate()
            .map(|(index, play)| hit(&format!("BV{index}"), *play))
            .collect();
        let results = filter_and_rank(&raw, 50_000, 3);
        let ids: Vec<&str> = results.iter().map(|result| result.bvid.as_str()).collect();
        assert_eq!(ids, ["BV0", "BV2", "BV3"]);
        assert!(results.iter().all(|result| result.play_count >= 50_000));
    }

    #[test]
    fn filter_cleans_title_and_description() {
        let results = filter_and_rank(&[hit("BV1", 1)], 0, 5);
        assert_eq!(results[0].title, "example video BV1");
        assert_eq!(results[0].description.chars().count(), DESCRIPTION_LIMIT);
    }

    #[test]
    fn filter_truncates_description_by_characters() {
        let raw = json!({ "bvid": "BV1", "play": 1, "description": "字".repeat(120) });
        let results = filter_and_rank(&[raw], 0, 5);
        assert_eq!(results[0].description, "字".repeat(DESCRIPTION_LIMIT));
    }

    #[test]
    fn filter_skips_unreadable_entries() {
        let raw = vec![
            json!("not an object"),
            json!({ "title": "missing bvid", "play": 100 }),
            json!({ "bvid": "BVhidden", "play": "--" }),
            json!({ "bvid": "BVneg", "play": -5 }),
            json!({ "bvid": "BVtext", "play": "1200" }),
            json!({ "bvid": "BVnoplay" }),
        ];
        let results = filter_and_rank(&raw, 0, 10);
        let ids: Vec<&str> = results.iter().map(|result| result.bvid.as_str()).collect();
        assert_eq!(ids, ["BVtext", "BVnoplay"]);
        assert_eq!(results[1].play_count, 0);
    }

    #[test]
    fn filter_with_zero_cap_returns_nothing() {
        assert!(filter_and_rank(&[hit("BV1", 100)], 0, 0).is_empty());
    }

    #[test]
    fn strip_highlight_handles_variants() {
        assert_eq!(
            strip_highlight("<em class=\"keyword\">Rust</em> 教程 <em>入门</em>"),
            "Rust 教程 入门"
        );
        assert_eq!(strip_highlight("a < b <emph> c"), "a < b <emph> c");
        assert_eq!(strip_highlight("unterminated <em class=x"), "unterminated <em class=x");
    }

    #[test]
    fn search_example_keyword_end_to_end() {
        let plays = [120_000, 3_000, 55_000, 50_000, 49_999, 800_000, 10, 61_000];
        let raw: Vec<Value> = plays
            .iter()
            .enumerate()
            .map(|(index, play)| hit(&format!("BV{index}"), *play))
            .collect();
        let api = FakeApi::default().with_search_page(raw);

        let results = search_videos(&api, "example", 50_000, 5, 1, 20);

        assert_eq!(results.len(), 5);
        for result in &results {
            assert!(result.play_count >= 50_000);
            assert!(!result.title.contains("<em"));
            assert!(!result.title.contains("</em>"));
        }
        assert_eq!(api.search_calls(), vec![("example".to_string(), 1, 20)]);
    }

    #[test]
    fn search_reads_further_pages_until_cap() {
        let api = FakeApi::default()
            .with_search_page(vec![hit("BV1", 100_000), hit("BV2", 1)])
            .with_search_page(vec![hit("BV3", 100_000), hit("BV4", 100_000)])
            .with_search_page(vec![hit("BV5", 100_000)]);

        let results = search_videos(&api, "rust", 50_000, 2, 5, 2);

        let ids: Vec<&str> = results.iter().map(|result| result.bvid.as_str()).collect();
        assert_eq!(ids, ["BV1", "BV3"]);
        assert_eq!(api.search_calls().len(), 2);
    }

    #[test]
    fn search_stops_on_empty_page() {
        let api = FakeApi::default().with_search_page(vec![hit("BV1", 100_000)]);
        let results = search_videos(&api, "rust", 0, 10, 4, 20);
        assert_eq!(results.len(), 1);
        assert_eq!(api.search_calls().len(), 2);
    }
}

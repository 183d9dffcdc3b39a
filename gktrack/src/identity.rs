//! Track identity derivation.
//!
//! Two submissions name "the same track" when their normalized title,
//! reported duration, and platform URL key all agree. The rules below are
//! frozen by the snapshot schema version: older snapshots are re-keyed with
//! these exact functions on restore.

use crate::descriptor::TrackDescriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Bracketed annotations that do not change a track's identity.
static TITLE_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\s*[\(\[\{]\s*(official (audio|video|mv)|lyrics?|hd|4k|remastered|m/?v)\s*[\)\]\}]",
    )
    .expect("title noise regex")
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Derived identity of a track: `(normalized_title, duration_ms, url_key)`.
///
/// Deterministic and stable across restarts. Distinct queue entries may
/// share a key (same track requested by different users).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub normalized_title: String,
    pub duration_ms: u64,
    pub url_key: String,
}

impl TrackKey {
    pub fn from_descriptor(descriptor: &TrackDescriptor) -> Self {
        TrackKey {
            normalized_title: normalize_title(&descriptor.title),
            duration_ms: descriptor.duration_ms,
            url_key: extract_url_key(&descriptor.canonical_url),
        }
    }
}

/// Lower-cases a title, strips bracketed noise annotations, and collapses
/// redundant whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = TITLE_NOISE.replace_all(&lowered, "");
    WHITESPACE.replace_all(stripped.trim(), " ").to_string()
}

/// Extracts the platform-specific identifier out of a canonical URL.
///
/// Falls back to the whole URL (lower-cased, trimmed) when the host is not
/// one of the ID-addressable platforms, so direct-file sources still get a
/// stable key.
pub fn extract_url_key(canonical_url: &str) -> String {
    let fallback = || canonical_url.trim().to_lowercase();

    let Ok(parsed) = Url::parse(canonical_url.trim()) else {
        return fallback();
    };
    let Some(host) = parsed.host_str().map(str::to_lowercase) else {
        return fallback();
    };

    if host == "youtu.be" {
        let id = parsed.path().trim_matches('/');
        if !id.is_empty() {
            return id.to_string();
        }
    } else if host.ends_with("youtube.com") {
        if let Some((_, v)) = parsed.query_pairs().find(|(k, _)| k == "v") {
            if !v.is_empty() {
                return v.into_owned();
            }
        }
        // embed-style paths carry the id as the last segment
        if let Some(id) = parsed
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty() && parsed.path().contains("/embed/"))
        {
            return id.to_string();
        }
    } else if host.ends_with("bilibili.com") {
        if let Some(id) = parsed
            .path_segments()
            .into_iter()
            .flatten()
            .find(|s| s.starts_with("BV") || s.starts_with("av"))
        {
            return id.to_string();
        }
    } else if host.ends_with("music.163.com") || host.ends_with("music.126.net") {
        if let Some(id) = netease_song_id(&parsed) {
            return id;
        }
    } else if host.ends_with("catbox.moe") {
        if let Some(name) = parsed
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
        {
            return name.to_lowercase();
        }
    }

    fallback()
}

/// NetEase links put the numeric id either in the query (`/song?id=N`) or
/// behind a fragment route (`/#/song?id=N`).
fn netease_song_id(parsed: &Url) -> Option<String> {
    if let Some((_, id)) = parsed.query_pairs().find(|(k, _)| k == "id") {
        if !id.is_empty() {
            return Some(id.into_owned());
        }
    }
    let fragment = parsed.fragment()?;
    let (_, query) = fragment.split_once('?')?;
    query
        .split('&')
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == "id")
        .map(|(_, v)| v.to_string())
        .filter(|v| !v.is_empty())
}

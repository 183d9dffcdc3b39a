//! YouTube provider.
//!
//! Extraction goes through the public oEmbed endpoint (title, uploader,
//! thumbnail — no duration). Resolution asks the innertube player endpoint
//! for a fresh time-limited audio stream URL; those URLs carry an `expire`
//! parameter and rot within hours, which is exactly why they are never
//! persisted.

use crate::error::{Result, SourceError};
use crate::provider::{with_cancel, MediaProvider, USER_AGENT, HTTP_TIMEOUT};
use async_trait::async_trait;
use gktrack::{SourceTag, TrackDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

static URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?:https?://)?(?:www\.|m\.)?youtube\.com/watch\?.*\bv=[a-zA-Z0-9_-]+")
            .expect("youtube watch pattern"),
        Regex::new(r"(?:https?://)?youtu\.be/[a-zA-Z0-9_-]+").expect("youtube short pattern"),
        Regex::new(r"(?:https?://)?(?:www\.)?youtube\.com/embed/[a-zA-Z0-9_-]+")
            .expect("youtube embed pattern"),
    ]
});

pub struct YoutubeProvider {
    client: reqwest::Client,
    oembed_base: String,
    player_base: String,
}

impl YoutubeProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            oembed_base: "https://www.youtube.com".to_string(),
            player_base: "https://www.youtube.com".to_string(),
        }
    }

    /// Points both API bases at a different host. Test hook.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.oembed_base = base.clone();
        self.player_base = base;
        self
    }

    fn video_id(url: &str) -> Option<String> {
        let id = gktrack::extract_url_key(url);
        // the fallback returns the whole URL; a real video id never
        // contains a scheme separator
        if id.contains("://") || id.contains('/') {
            None
        } else {
            Some(id)
        }
    }

    async fn fetch_oembed(&self, canonical_url: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/oembed", self.oembed_base))
            .query(&[("url", canonical_url), ("format", "json")])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(response.json::<Value>().await?),
            404 | 401 => Err(SourceError::NotFound(canonical_url.to_string())),
            429 => Err(SourceError::RateLimited("youtube oembed".to_string())),
            code => Err(SourceError::Network(format!("oembed returned HTTP {code}"))),
        }
    }

    async fn fetch_stream_url(&self, video_id: &str) -> Result<String> {
        // The android innertube client returns direct (non-ciphered)
        // stream URLs.
        let body = json!({
            "videoId": video_id,
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": "19.09.37",
                    "androidSdkVersion": 30
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/youtubei/v1/player", self.player_base))
            .json(&body)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            return Err(SourceError::RateLimited("youtube player".to_string()));
        }

        let payload: Value = response.json().await?;

        match payload["playabilityStatus"]["status"].as_str() {
            Some("OK") | None => {}
            Some("LOGIN_REQUIRED") | Some("AGE_CHECK_REQUIRED") => {
                return Err(SourceError::DrmBlocked(video_id.to_string()))
            }
            Some(other) => {
                let reason = payload["playabilityStatus"]["reason"]
                    .as_str()
                    .unwrap_or(other);
                if reason.to_lowercase().contains("country") {
                    return Err(SourceError::GeoBlocked(reason.to_string()));
                }
                return Err(SourceError::NotFound(reason.to_string()));
            }
        }

        let formats = payload["streamingData"]["adaptiveFormats"]
            .as_array()
            .ok_or_else(|| SourceError::Malformed("missing streamingData".to_string()))?;

        let best_audio = formats
            .iter()
            .filter(|f| {
                f["mimeType"]
                    .as_str()
                    .map(|m| m.starts_with("audio/"))
                    .unwrap_or(false)
            })
            .max_by_key(|f| f["bitrate"].as_u64().unwrap_or(0))
            .ok_or_else(|| SourceError::Malformed("no audio format in response".to_string()))?;

        best_audio["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SourceError::Malformed("audio format without url".to_string()))
    }
}

impl Default for YoutubeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProvider for YoutubeProvider {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Youtube
    }

    fn matches(&self, url: &str) -> bool {
        URL_PATTERNS.iter().any(|p| p.is_match(url))
    }

    async fn extract(&self, url: &str, cancel: &CancellationToken) -> Result<TrackDescriptor> {
        let video_id = Self::video_id(url)
            .ok_or_else(|| SourceError::Malformed(format!("no video id in {url}")))?;
        let canonical_url = format!("https://www.youtube.com/watch?v={video_id}");

        let payload = with_cancel(cancel, self.fetch_oembed(&canonical_url)).await?;

        let title = payload["title"]
            .as_str()
            .ok_or_else(|| SourceError::Malformed("oembed response without title".to_string()))?
            .to_string();

        debug!(%video_id, %title, "Extracted YouTube track");

        Ok(TrackDescriptor {
            title,
            // oEmbed does not expose duration; identity still works because
            // duplicates of the same video agree on 0
            duration_ms: 0,
            canonical_url,
            uploader: payload["author_name"].as_str().map(str::to_string),
            thumbnail_url: payload["thumbnail_url"].as_str().map(str::to_string),
            source_tag: SourceTag::Youtube,
        })
    }

    async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let video_id = Self::video_id(&descriptor.canonical_url).ok_or_else(|| {
            SourceError::Malformed(format!(
                "canonical URL carries no video id: {}",
                descriptor.canonical_url
            ))
        })?;
        with_cancel(cancel, self.fetch_stream_url(&video_id)).await
    }
}

//! SoundCloud provider.
//!
//! There is no stable public API without an app credential, so extraction
//! scrapes the hydration JSON embedded in the track page, the same way the
//! web player bootstraps itself. Resolution re-scrapes the page (stream
//! references rotate) and exchanges the progressive transcoding reference
//! for a fresh stream URL.

use crate::error::{Result, SourceError};
use crate::provider::{with_cancel, MediaProvider, USER_AGENT, HTTP_TIMEOUT};
use async_trait::async_trait;
use gktrack::{SourceTag, TrackDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^https?://(?:m\.)?soundcloud\.com/[^/]+/[^/?#]+").expect("soundcloud track"),
        Regex::new(r"^https?://(?:on\.soundcloud\.com|snd\.sc)/[^?#]+")
            .expect("soundcloud short link"),
    ]
});

static HYDRATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)window\.__sc_hydration\s*=\s*(\[.*?\]);").expect("soundcloud hydration pattern")
});

pub struct SoundcloudProvider {
    client: reqwest::Client,
    web_base: Option<String>,
}

impl SoundcloudProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            web_base: None,
        }
    }

    /// Test hook: rewrites page fetches to a different host.
    pub fn with_web_base(mut self, base: impl Into<String>) -> Self {
        self.web_base = Some(base.into());
        self
    }

    fn page_url(&self, url: &str) -> String {
        match &self.web_base {
            Some(base) => {
                let path = url.splitn(4, '/').nth(3).unwrap_or_default();
                format!("{base}/{path}")
            }
            None => url.to_string(),
        }
    }

    /// Fetches a track page and returns the hydrated `sound` object.
    async fn fetch_sound(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(self.page_url(url))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => {}
            404 | 410 => return Err(SourceError::NotFound(url.to_string())),
            429 => return Err(SourceError::RateLimited("soundcloud".to_string())),
            code => return Err(SourceError::Network(format!("soundcloud HTTP {code}"))),
        }

        let body = response.text().await?;
        let hydration_json = HYDRATION
            .captures(&body)
            .and_then(|c| c.get(1))
            .ok_or_else(|| SourceError::Malformed("page without hydration data".to_string()))?;

        let hydration: Value = serde_json::from_str(hydration_json.as_str())
            .map_err(|e| SourceError::Malformed(format!("bad hydration JSON: {e}")))?;

        hydration
            .as_array()
            .into_iter()
            .flatten()
            .find(|entry| entry["hydratable"].as_str() == Some("sound"))
            .map(|entry| entry["data"].clone())
            .ok_or_else(|| SourceError::NotFound(url.to_string()))
    }

    /// Picks the progressive transcoding and exchanges it for a stream URL.
    async fn fetch_stream_url(&self, sound: &Value) -> Result<String> {
        let transcodings = sound["media"]["transcodings"]
            .as_array()
            .ok_or_else(|| SourceError::Malformed("sound without transcodings".to_string()))?;

        let progressive = transcodings
            .iter()
            .find(|t| t["format"]["protocol"].as_str() == Some("progressive"))
            .ok_or_else(|| SourceError::DrmBlocked("no progressive stream".to_string()))?;

        let endpoint = progressive["url"]
            .as_str()
            .ok_or_else(|| SourceError::Malformed("transcoding without url".to_string()))?;
        let authorization = sound["track_authorization"].as_str().unwrap_or_default();

        let response = self
            .client
            .get(endpoint)
            .query(&[("track_authorization", authorization)])
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        if response.status().as_u16() == 401 || response.status().as_u16() == 403 {
            return Err(SourceError::Expired("soundcloud stream grant".to_string()));
        }

        let payload: Value = response.json().await?;
        payload["url"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SourceError::Malformed("stream response without url".to_string()))
    }
}

impl Default for SoundcloudProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProvider for SoundcloudProvider {
    fn name(&self) -> &'static str {
        "soundcloud"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Soundcloud
    }

    fn matches(&self, url: &str) -> bool {
        URL_PATTERNS.iter().any(|p| p.is_match(url))
    }

    async fn extract(&self, url: &str, cancel: &CancellationToken) -> Result<TrackDescriptor> {
        let sound = with_cancel(cancel, self.fetch_sound(url)).await?;

        let title = sound["title"]
            .as_str()
            .ok_or_else(|| SourceError::Malformed("sound without title".to_string()))?
            .to_string();

        // permalink_url survives track renames; fall back to the input
        let canonical_url = sound["permalink_url"]
            .as_str()
            .unwrap_or(url)
            .to_string();

        debug!(%title, %canonical_url, "Extracted SoundCloud track");

        Ok(TrackDescriptor {
            title,
            duration_ms: sound["duration"].as_u64().unwrap_or(0),
            canonical_url,
            uploader: sound["user"]["username"].as_str().map(str::to_string),
            thumbnail_url: sound["artwork_url"].as_str().map(str::to_string),
            source_tag: SourceTag::Soundcloud,
        })
    }

    async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String> {
        with_cancel(cancel, async {
            let sound = self.fetch_sound(&descriptor.canonical_url).await?;
            self.fetch_stream_url(&sound).await
        })
        .await
    }
}

//! Bilibili provider.
//!
//! Extraction uses the public `x/web-interface/view` API; resolution walks
//! view → cid → `x/player/playurl` and returns the freshest audio stream
//! URL. Bilibili CDN URLs expire quickly and require a Referer header, both
//! handled here.

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
        Regex::new(r"https?://(?:www\.)?bilibili\.com/video/(BV[a-zA-Z0-9]{10})")
            .expect("bilibili bv pattern"),
        Regex::new(r"https?://(?:www\.)?bilibili\.com/video/(av\d+)")
            .expect("bilibili av pattern"),
    ]
});

const REFERER: &str = "https://www.bilibili.com/";

pub struct BilibiliProvider {
    client: reqwest::Client,
    api_base: String,
}

impl BilibiliProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: "https://api.bilibili.com".to_string(),
        }
    }

    /// Test hook.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn video_id(url: &str) -> Option<String> {
        URL_PATTERNS
            .iter()
            .find_map(|p| p.captures(url))
            .map(|c| c[1].to_string())
    }

    fn id_query(video_id: &str) -> Vec<(&'static str, String)> {
        if let Some(aid) = video_id.strip_prefix("av") {
            vec![("aid", aid.to_string())]
        } else {
            vec![("bvid", video_id.to_string())]
        }
    }

    async fn fetch_view(&self, video_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/x/web-interface/view", self.api_base))
            .query(&Self::id_query(video_id))
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::REFERER, REFERER)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        let payload: Value = response.json().await?;
        match payload["code"].as_i64() {
            Some(0) => Ok(payload["data"].clone()),
            Some(-404) | Some(62002) | Some(62004) => {
                Err(SourceError::NotFound(video_id.to_string()))
            }
            Some(-412) => Err(SourceError::RateLimited("bilibili view".to_string())),
            Some(code) => Err(SourceError::Malformed(format!(
                "bilibili view returned code {code}"
            ))),
            None => Err(SourceError::Malformed(
                "bilibili view response without code".to_string(),
            )),
        }
    }

    async fn fetch_audio_url(&self, video_id: &str) -> Result<String> {
        let view = self.fetch_view(video_id).await?;
        let cid = view["cid"]
            .as_u64()
            .ok_or_else(|| SourceError::Malformed("view response without cid".to_string()))?;

        let mut query = Self::id_query(video_id);
        query.push(("cid", cid.to_string()));
        // fnval=16 requests the DASH manifest, which carries audio-only streams
        query.push(("fnval", "16".to_string()));

        let response = self
            .client
            .get(format!("{}/x/player/playurl", self.api_base))
            .query(&query)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::REFERER, REFERER)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        let payload: Value = response.json().await?;
        match payload["code"].as_i64() {
            Some(0) => {}
            Some(-404) => return Err(SourceError::NotFound(video_id.to_string())),
            Some(-10403) => return Err(SourceError::GeoBlocked(video_id.to_string())),
            Some(code) => {
                return Err(SourceError::Malformed(format!(
                    "bilibili playurl returned code {code}"
                )))
            }
            None => {
                return Err(SourceError::Malformed(
                    "bilibili playurl response without code".to_string(),
                ))
            }
        }

        let audio_streams = payload["data"]["dash"]["audio"]
            .as_array()
            .ok_or_else(|| SourceError::Malformed("playurl response without audio".to_string()))?;

        audio_streams
            .iter()
            .max_by_key(|s| s["bandwidth"].as_u64().unwrap_or(0))
            .and_then(|s| s["baseUrl"].as_str().or_else(|| s["base_url"].as_str()))
            .map(str::to_string)
            .ok_or_else(|| SourceError::Malformed("audio stream without baseUrl".to_string()))
    }
}

impl Default for BilibiliProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProvider for BilibiliProvider {
    fn name(&self) -> &'static str {
        "bilibili"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Bilibili
    }

    fn matches(&self, url: &str) -> bool {
        URL_PATTERNS.iter().any(|p| p.is_match(url))
    }

    async fn extract(&self, url: &str, cancel: &CancellationToken) -> Result<TrackDescriptor> {
        let video_id = Self::video_id(url)
            .ok_or_else(|| SourceError::Malformed(format!("no video id in {url}")))?;

        let view = with_cancel(cancel, self.fetch_view(&video_id)).await?;

        let title = view["title"]
            .as_str()
            .ok_or_else(|| SourceError::Malformed("view response without title".to_string()))?
            .to_string();

        debug!(%video_id, %title, "Extracted Bilibili track");

        Ok(TrackDescriptor {
            title,
            duration_ms: view["duration"].as_u64().unwrap_or(0) * 1000,
            canonical_url: format!("https://www.bilibili.com/video/{video_id}"),
            uploader: view["owner"]["name"].as_str().map(str::to_string),
            thumbnail_url: view["pic"].as_str().map(str::to_string),
            source_tag: SourceTag::Bilibili,
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
        with_cancel(cancel, self.fetch_audio_url(&video_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches() {
        let provider = BilibiliProvider::new();
        assert!(provider.matches("https://www.bilibili.com/video/BV1xx411c7mD"));
        assert!(provider.matches("https://bilibili.com/video/av170001"));
        assert!(!provider.matches("https://www.bilibili.com/read/cv12345"));
        assert!(!provider.matches("https://youtu.be/dQw4w9WgXcQ"));
    }

    #[test]
    fn test_video_id_and_query() {
        assert_eq!(
            BilibiliProvider::video_id("https://www.bilibili.com/video/BV1xx411c7mD").as_deref(),
            Some("BV1xx411c7mD")
        );
        assert_eq!(
            BilibiliProvider::id_query("av170001"),
            vec![("aid", "170001".to_string())]
        );
        assert_eq!(
            BilibiliProvider::id_query("BV1xx411c7mD"),
            vec![("bvid", "BV1xx411c7mD".to_string())]
        );
    }
}

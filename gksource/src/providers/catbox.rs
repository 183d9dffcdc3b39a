//! Catbox provider: direct audio files on `files.catbox.moe`.
//!
//! The file URL is both the canonical and the playable URL, so resolution
//! never touches the network. Extraction does a HEAD request to confirm the
//! file exists before the track is admitted.

use crate::error::{Result, SourceError};
use crate::provider::{with_cancel, MediaProvider, USER_AGENT, HTTP_TIMEOUT};
use async_trait::async_trait;
use gktrack::{SourceTag, TrackDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://files\.catbox\.moe/[a-zA-Z0-9]+\.[a-zA-Z0-9]+$")
        .expect("catbox pattern")
});

pub struct CatboxProvider {
    client: reqwest::Client,
}

impl CatboxProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn file_name(url: &str) -> String {
        url.rsplit('/').next().unwrap_or(url).to_string()
    }

    async fn head(&self, url: &str) -> Result<()> {
        let response = self
            .client
            .head(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        match response.status().as_u16() {
            200 => Ok(()),
            404 | 410 => Err(SourceError::NotFound(url.to_string())),
            429 => Err(SourceError::RateLimited("catbox".to_string())),
            code => Err(SourceError::Network(format!("catbox HTTP {code}"))),
        }
    }
}

impl Default for CatboxProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProvider for CatboxProvider {
    fn name(&self) -> &'static str {
        "catbox"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Catbox
    }

    fn matches(&self, url: &str) -> bool {
        URL_PATTERN.is_match(url)
    }

    async fn extract(&self, url: &str, cancel: &CancellationToken) -> Result<TrackDescriptor> {
        with_cancel(cancel, self.head(url)).await?;

        let title = Self::file_name(url);
        debug!(%title, "Extracted Catbox file");

        Ok(TrackDescriptor {
            title,
            // duration is unknown without downloading the file
            duration_ms: 0,
            canonical_url: url.to_string(),
            uploader: None,
            thumbnail_url: None,
            source_tag: SourceTag::Catbox,
        })
    }

    async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        // direct file: the canonical URL is the stream URL
        Ok(descriptor.canonical_url.clone())
    }
}

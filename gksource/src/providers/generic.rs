//! Generic direct-file provider: any http(s) URL with an audio extension.
//!
//! Registered last, so it only sees URLs no dedicated provider claimed.

use crate::error::{Result, SourceError};
use crate::provider::{with_cancel, MediaProvider, USER_AGENT, HTTP_TIMEOUT};
use async_trait::async_trait;
use gktrack::{SourceTag, TrackDescriptor};
use tokio_util::sync::CancellationToken;
use url::Url;

const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".ogg", ".m4a", ".flac", ".aac", ".opus", ".wma",
];

pub struct GenericProvider {
    client: reqwest::Client,
}

impl GenericProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn audio_path(url: &Url) -> bool {
        let path = url.path().to_lowercase();
        AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }

    fn file_name(url: &Url) -> String {
        url.path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .unwrap_or("audio")
            .to_string()
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
            // some static hosts refuse HEAD but serve GET fine
            200 | 405 | 501 => Ok(()),
            404 | 410 => Err(SourceError::NotFound(url.to_string())),
            429 => Err(SourceError::RateLimited("generic host".to_string())),
            code => Err(SourceError::Network(format!("HTTP {code}"))),
        }
    }
}

impl Default for GenericProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProvider for GenericProvider {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Generic
    }

    fn matches(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https") && Self::audio_path(&u))
            .unwrap_or(false)
    }

    async fn extract(&self, url: &str, cancel: &CancellationToken) -> Result<TrackDescriptor> {
        let parsed = Url::parse(url)
            .map_err(|e| SourceError::Malformed(format!("invalid URL {url}: {e}")))?;

        with_cancel(cancel, self.head(url)).await?;

        Ok(TrackDescriptor {
            title: Self::file_name(&parsed),
            duration_ms: 0,
            canonical_url: url.to_string(),
            uploader: None,
            thumbnail_url: None,
            source_tag: SourceTag::Generic,
        })
    }

    async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        _cancel: &CancellationToken,
    ) -> Result<String> {
        Ok(descriptor.canonical_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_audio_extensions() {
        let provider = GenericProvider::new();
        for ext in AUDIO_EXTENSIONS {
            assert!(
                provider.matches(&format!("https://example.com/track{ext}")),
                "should match {ext}"
            );
        }
        assert!(provider.matches("http://example.com/dir/a.MP3"));
        assert!(!provider.matches("https://example.com/track.mp4"));
        assert!(!provider.matches("https://example.com/page.html"));
        assert!(!provider.matches("ftp://example.com/track.mp3"));
        assert!(!provider.matches("not a url"));
    }

    #[test]
    fn test_file_name() {
        let url = Url::parse("https://example.com/music/song.flac").unwrap();
        assert_eq!(GenericProvider::file_name(&url), "song.flac");
    }
}

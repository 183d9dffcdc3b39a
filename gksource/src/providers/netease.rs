//! NetEase Cloud Music provider.
//!
//! The canonical URL is always `https://music.163.com/song?id=N`; playable
//! URLs come from the player-url API and point at `music.126.net` CDN hosts
//! that expire after a short window.
//!
//! Two deployment aids carried over from production use:
//! - **Proxy substitution**: when `provider.netease.proxy.host` is set,
//!   every outgoing API and CDN URL has its domain swapped for the proxy,
//!   which routes around regional blocks.
//! - **Membership cookie**: `provider.netease.member.cookie` is attached to
//!   player-url requests to unlock premium bitrates. Without it, member-only
//!   tracks resolve to nothing and are reported as not found.

use crate::config_ext::NeteaseProxy;
use crate::error::{Result, SourceError};
use crate::provider::{with_cancel, MediaProvider, USER_AGENT, HTTP_TIMEOUT};
use async_trait::async_trait;
use gktrack::{extract_url_key, SourceTag, TrackDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;
use tracing::{debug, warn};

static URL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?:y\.)?music\.163\.com/(?:#/|m/)?song\?id=(\d+)")
            .expect("netease song pattern"),
        Regex::new(r"music\.163\.com/song/media/outer/url\?id=(\d+)")
            .expect("netease outer pattern"),
        Regex::new(r"music\.126\.net/.*[?&]id=(\d+)").expect("netease cdn pattern"),
    ]
});

const STANDARD_BITRATE: u32 = 320_000;

pub struct NeteaseProvider {
    client: reqwest::Client,
    api_base: String,
    proxy: NeteaseProxy,
    member_cookie: Option<String>,
}

impl NeteaseProvider {
    pub fn new(proxy: NeteaseProxy, member_cookie: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: "https://music.163.com".to_string(),
            proxy,
            member_cookie,
        }
    }

    /// Test hook.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn song_id(url: &str) -> Option<String> {
        let key = extract_url_key(url);
        if key.chars().all(|c| c.is_ascii_digit()) && !key.is_empty() {
            return Some(key);
        }
        URL_PATTERNS
            .iter()
            .find_map(|p| p.captures(url))
            .map(|c| c[1].to_string())
    }

    /// Applies the configured proxy domain to an outgoing URL. The proxy
    /// host may carry an explicit port (`mirror.example.org:8080`).
    fn apply_proxy(&self, raw: &str) -> String {
        let Some(proxy_host) = &self.proxy.host else {
            return raw.to_string();
        };
        let (host, port) = match proxy_host.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (h, p.parse::<u16>().ok())
            }
            _ => (proxy_host.as_str(), None),
        };
        match Url::parse(raw) {
            Ok(mut parsed) => {
                let _ = parsed.set_scheme(&self.proxy.protocol);
                if parsed.set_host(Some(host)).is_err() {
                    warn!(proxy_host = %proxy_host, "Invalid proxy host, keeping original URL");
                    return raw.to_string();
                }
                let _ = parsed.set_port(port);
                parsed.to_string()
            }
            Err(_) => raw.to_string(),
        }
    }

    async fn fetch_detail(&self, song_id: &str) -> Result<Value> {
        let url = self.apply_proxy(&format!(
            "{}/api/song/detail?ids=[{}]",
            self.api_base, song_id
        ));
        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::REFERER, "https://music.163.com/")
            .timeout(HTTP_TIMEOUT)
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            return Err(SourceError::RateLimited("netease detail".to_string()));
        }

        let payload: Value = response.json().await?;
        let songs = payload["songs"]
            .as_array()
            .ok_or_else(|| SourceError::Malformed("detail response without songs".to_string()))?;
        songs
            .first()
            .cloned()
            .ok_or_else(|| SourceError::NotFound(song_id.to_string()))
    }

    async fn fetch_player_url(&self, song_id: &str) -> Result<String> {
        let url = self.apply_proxy(&format!(
            "{}/api/song/enhance/player/url?ids=[{}]&br={}",
            self.api_base, song_id, STANDARD_BITRATE
        ));

        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::REFERER, "https://music.163.com/")
            .timeout(HTTP_TIMEOUT);

        if let Some(cookie) = &self.member_cookie {
            request = request.header(reqwest::header::COOKIE, cookie.clone());
        }

        let response = request.send().await?;
        if response.status().as_u16() == 429 {
            return Err(SourceError::RateLimited("netease player url".to_string()));
        }

        let payload: Value = response.json().await?;
        let entry = payload["data"]
            .as_array()
            .and_then(|d| d.first())
            .cloned()
            .ok_or_else(|| SourceError::Malformed("player-url response without data".to_string()))?;

        match entry["code"].as_i64() {
            Some(200) | None => {}
            Some(-110) => return Err(SourceError::GeoBlocked(song_id.to_string())),
            Some(code) => {
                debug!(%song_id, code, "NetEase player-url refused the track");
            }
        }

        match entry["url"].as_str() {
            Some(stream_url) if !stream_url.is_empty() => Ok(self.apply_proxy(stream_url)),
            _ => {
                // fee-gated tracks return a null URL without member credentials
                if self.member_cookie.is_none() && entry["fee"].as_i64().unwrap_or(0) != 0 {
                    Err(SourceError::NotFound(format!(
                        "song {song_id} requires a membership cookie"
                    )))
                } else {
                    Err(SourceError::NotFound(song_id.to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl MediaProvider for NeteaseProvider {
    fn name(&self) -> &'static str {
        "netease"
    }

    fn source_tag(&self) -> SourceTag {
        SourceTag::Netease
    }

    fn matches(&self, url: &str) -> bool {
        URL_PATTERNS.iter().any(|p| p.is_match(url)) || {
            // any music.163.com / music.126.net host with an id param
            Url::parse(url)
                .ok()
                .and_then(|u| {
                    let host = u.host_str()?.to_lowercase();
                    Some(
                        (host.ends_with("music.163.com") || host.ends_with("music.126.net"))
                            && Self::song_id(url).is_some(),
                    )
                })
                .unwrap_or(false)
        }
    }

    async fn extract(&self, url: &str, cancel: &CancellationToken) -> Result<TrackDescriptor> {
        let song_id = Self::song_id(url)
            .ok_or_else(|| SourceError::Malformed(format!("no song id in {url}")))?;

        let song = with_cancel(cancel, self.fetch_detail(&song_id)).await?;

        let title = song["name"]
            .as_str()
            .ok_or_else(|| SourceError::Malformed("song detail without name".to_string()))?
            .to_string();

        let uploader = song["artists"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|a| a["name"].as_str())
            .map(str::to_string);

        debug!(%song_id, %title, "Extracted NetEase track");

        Ok(TrackDescriptor {
            title,
            duration_ms: song["duration"].as_u64().unwrap_or(0),
            // permanent catalog reference, never the CDN link
            canonical_url: format!("https://music.163.com/song?id={song_id}"),
            uploader,
            thumbnail_url: song["album"]["picUrl"].as_str().map(str::to_string),
            source_tag: SourceTag::Netease,
        })
    }

    async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let song_id = Self::song_id(&descriptor.canonical_url).ok_or_else(|| {
            SourceError::Malformed(format!(
                "canonical URL carries no song id: {}",
                descriptor.canonical_url
            ))
        })?;
        with_cancel(cancel, self.fetch_player_url(&song_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> NeteaseProvider {
        NeteaseProvider::new(NeteaseProxy::default(), None)
    }

    #[test]
    fn test_matches() {
        let p = provider();
        assert!(p.matches("https://music.163.com/song?id=1901371647"));
        assert!(p.matches("https://music.163.com/#/song?id=1901371647"));
        assert!(p.matches("https://y.music.163.com/m/song?id=1901371647"));
        assert!(p.matches("https://music.163.com/song/media/outer/url?id=1901371647"));
        assert!(!p.matches("https://music.163.com/artist?aid=12345"));
        assert!(!p.matches("https://example.com/song?id=42"));
    }

    #[test]
    fn test_song_id() {
        assert_eq!(
            NeteaseProvider::song_id("https://music.163.com/song?id=1901371647").as_deref(),
            Some("1901371647")
        );
        assert_eq!(
            NeteaseProvider::song_id("https://music.163.com/#/song?id=99").as_deref(),
            Some("99")
        );
        assert_eq!(NeteaseProvider::song_id("https://music.163.com/"), None);
    }

    #[test]
    fn test_apply_proxy() {
        let p = NeteaseProvider::new(
            NeteaseProxy {
                host: Some("mirror.example.org".to_string()),
                protocol: "https".to_string(),
            },
            None,
        );
        assert_eq!(
            p.apply_proxy("https://music.163.com/api/song/detail?ids=[1]"),
            "https://mirror.example.org/api/song/detail?ids=[1]"
        );
        assert_eq!(
            p.apply_proxy("http://m701.music.126.net/some/file.mp3"),
            "https://mirror.example.org/some/file.mp3"
        );

        let noop = provider();
        assert_eq!(
            noop.apply_proxy("https://music.163.com/x"),
            "https://music.163.com/x"
        );
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tenant (a chat-platform guild).
///
/// Opaque to the engine; only used as a map key and a snapshot file name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuildId(pub String);

impl GuildId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for GuildId {
    fn from(s: &str) -> Self {
        GuildId(s.to_string())
    }
}

/// Identifier of a requesting user. Opaque; never dereferenced by the
/// engine — reachability questions go to the voice transport instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Which provider family recognized a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    Youtube,
    Catbox,
    Netease,
    Bilibili,
    Soundcloud,
    Generic,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Youtube => "youtube",
            SourceTag::Catbox => "catbox",
            SourceTag::Netease => "netease",
            SourceTag::Bilibili => "bilibili",
            SourceTag::Soundcloud => "soundcloud",
            SourceTag::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable metadata for a single track, built exactly once per request by
/// the provider that recognized the submitted URL.
///
/// `canonical_url` is the permanent, re-resolvable reference for the track:
/// for ID-addressable catalogs (netease, youtube, bilibili) it names the
/// catalog entry, never a CDN endpoint. Short-lived streamable URLs are
/// fetched from the provider immediately before playback and are never
/// stored here or in snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub title: String,
    pub duration_ms: u64,
    pub canonical_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub source_tag: SourceTag,
}

impl TrackDescriptor {
    /// Duration formatted as `M:SS` or `H:MM:SS` for status views.
    pub fn format_duration(&self) -> String {
        let total_secs = self.duration_ms / 1000;
        let (hours, rem) = (total_secs / 3600, total_secs % 3600);
        let (minutes, seconds) = (rem / 60, rem % 60);
        if hours > 0 {
            format!("{}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{}:{:02}", minutes, seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_tag_serde_roundtrip() {
        for tag in [
            SourceTag::Youtube,
            SourceTag::Catbox,
            SourceTag::Netease,
            SourceTag::Bilibili,
            SourceTag::Soundcloud,
            SourceTag::Generic,
        ] {
            let json = serde_json::to_string(&tag).unwrap();
            assert_eq!(json, format!("\"{}\"", tag.as_str()));
            let back: SourceTag = serde_json::from_str(&json).unwrap();
            assert_eq!(back, tag);
        }
    }

    #[test]
    fn test_format_duration() {
        let mut descriptor = TrackDescriptor {
            title: "t".into(),
            duration_ms: 225_000,
            canonical_url: "https://example.com/a.mp3".into(),
            uploader: None,
            thumbnail_url: None,
            source_tag: SourceTag::Generic,
        };
        assert_eq!(descriptor.format_duration(), "3:45");
        descriptor.duration_ms = 5_445_000;
        assert_eq!(descriptor.format_duration(), "1:30:45");
        descriptor.duration_ms = 0;
        assert_eq!(descriptor.format_duration(), "0:00");
    }
}

use thiserror::Error;

/// Failure kinds surfaced by providers and the registry.
///
/// Extraction can fail with `Network`, `RateLimited`, `NotFound`,
/// `Unsupported`, or `Malformed`; resolution adds `Expired`, `GeoBlocked`,
/// and `DrmBlocked`. `Cancelled` is reported when the owning pump shut down
/// while a call was in flight and is never shown to users.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("track not found: {0}")]
    NotFound(String),

    #[error("unsupported URL: {0}")]
    Unsupported(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("playable URL expired or was rejected by the host: {0}")]
    Expired(String),

    #[error("track is not available in this region: {0}")]
    GeoBlocked(String),

    #[error("track is DRM-protected: {0}")]
    DrmBlocked(String),

    #[error("track duration {0} s exceeds the configured maximum")]
    TrackTooLong(u64),

    #[error("operation cancelled")]
    Cancelled,
}

impl SourceError {
    /// True when retrying `resolve_playable` once may yield a working URL.
    pub fn is_expired(&self) -> bool {
        matches!(self, SourceError::Expired(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Network(format!("timeout: {err}"))
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                404 => SourceError::NotFound(err.to_string()),
                429 => SourceError::RateLimited(err.to_string()),
                403 => SourceError::Expired(err.to_string()),
                _ => SourceError::Network(err.to_string()),
            }
        } else {
            SourceError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;

use crate::error::{Result, SourceError};
use async_trait::async_trait;
use gktrack::{SourceTag, TrackDescriptor};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Request timeout applied to every provider HTTP call.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser-like User-Agent; some catalog hosts reject the default one.
pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A single media source (YouTube, NetEase, a direct file host, …).
///
/// Implementations are process-wide, internally concurrent, and registered
/// once at startup. Provider-internal retries stay internal; only the final
/// outcome is surfaced.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Short stable name, also used as the `provider.<name>.enabled`
    /// configuration key.
    fn name(&self) -> &'static str;

    /// Tag stamped on every descriptor this provider produces.
    fn source_tag(&self) -> SourceTag;

    /// Cheap, synchronous URL recognition.
    fn matches(&self, url: &str) -> bool;

    /// Fetches track metadata and builds the immutable descriptor.
    ///
    /// The returned `canonical_url` must be a permanent re-resolvable
    /// reference, never a transient CDN link.
    async fn extract(&self, url: &str, cancel: &CancellationToken) -> Result<TrackDescriptor>;

    /// Returns a fresh, short-lived streamable URL for the descriptor.
    ///
    /// Direct-file providers return `canonical_url` unchanged; catalog
    /// providers perform a new lookup on every call.
    async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String>;
}

/// Races a provider future against the caller's cancellation token.
pub(crate) async fn with_cancel<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        res = fut => res,
    }
}

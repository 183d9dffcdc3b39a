//! Provider registry: fixed-priority URL dispatch.

use crate::config_ext::SourceConfigExt;
use crate::error::{Result, SourceError};
use crate::provider::MediaProvider;
use crate::providers::{
    bilibili::BilibiliProvider, catbox::CatboxProvider, generic::GenericProvider,
    netease::NeteaseProvider, soundcloud::SoundcloudProvider, youtube::YoutubeProvider,
};
use gkconfig::Config;
use gktrack::TrackDescriptor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Ordered collection of providers; first match wins.
///
/// Built once at startup and immutable thereafter. Reloading the provider
/// set requires a full engine restart.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn MediaProvider>>,
    max_duration_ms: Option<u64>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Standard provider set in priority order (youtube, bilibili,
    /// netease, soundcloud, catbox, generic), honoring the per-provider
    /// `enabled` flags and the NetEase proxy/member settings.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::builder().max_duration_secs(config.max_track_duration_seconds());

        let standard: Vec<Arc<dyn MediaProvider>> = vec![
            Arc::new(YoutubeProvider::new()),
            Arc::new(BilibiliProvider::new()),
            Arc::new(NeteaseProvider::new(
                config.netease_proxy(),
                config.netease_member_cookie(),
            )),
            Arc::new(SoundcloudProvider::new()),
            Arc::new(CatboxProvider::new()),
            Arc::new(GenericProvider::new()),
        ];

        for provider in standard {
            if config.provider_enabled(provider.name()) {
                builder = builder.register(provider);
            } else {
                debug!(provider = provider.name(), "Provider disabled by configuration");
            }
        }

        builder.build()
    }

    /// First provider whose `matches` accepts the URL.
    pub fn recognize(&self, url: &str) -> Option<&dyn MediaProvider> {
        self.providers
            .iter()
            .find(|p| p.matches(url))
            .map(|p| p.as_ref())
    }

    pub fn is_supported(&self, url: &str) -> bool {
        self.recognize(url).is_some()
    }

    /// Recognizes the URL and extracts a descriptor from its provider,
    /// enforcing the configured maximum track duration.
    pub async fn extract(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<TrackDescriptor> {
        let provider = self
            .recognize(url)
            .ok_or_else(|| SourceError::Unsupported(url.to_string()))?;

        let descriptor = provider.extract(url, cancel).await?;
        debug!(
            provider = provider.name(),
            title = %descriptor.title,
            canonical_url = %descriptor.canonical_url,
            "Extracted track descriptor"
        );

        if let Some(max_ms) = self.max_duration_ms {
            if descriptor.duration_ms > max_ms {
                warn!(
                    title = %descriptor.title,
                    duration_ms = descriptor.duration_ms,
                    "Track exceeds the configured duration limit"
                );
                return Err(SourceError::TrackTooLong(descriptor.duration_ms / 1000));
            }
        }

        Ok(descriptor)
    }

    /// Fetches a fresh playable URL via the provider that owns the
    /// descriptor's source tag.
    pub async fn resolve_playable(
        &self,
        descriptor: &TrackDescriptor,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let provider = self
            .providers
            .iter()
            .find(|p| p.source_tag() == descriptor.source_tag)
            .ok_or_else(|| {
                SourceError::Unsupported(format!(
                    "no provider registered for source '{}'",
                    descriptor.source_tag
                ))
            })?;

        provider.resolve_playable(descriptor, cancel).await
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

/// Builder used by tests and embedders to assemble a custom provider list.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: Vec<Arc<dyn MediaProvider>>,
    max_duration_ms: Option<u64>,
}

impl ProviderRegistryBuilder {
    /// Appends a provider; registration order is match priority.
    pub fn register(mut self, provider: Arc<dyn MediaProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Maximum accepted track duration; 0 disables the check.
    pub fn max_duration_secs(mut self, secs: u64) -> Self {
        self.max_duration_ms = if secs == 0 { None } else { Some(secs * 1000) };
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
            max_duration_ms: self.max_duration_ms,
        }
    }
}

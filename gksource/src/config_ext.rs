//! Typed accessors for the `provider.*` section of the configuration.

use gkconfig::Config;

/// Reverse-proxy settings for the NetEase provider. When `host` is set,
/// every outgoing API and CDN request has its domain substituted, which
/// lets deployments route around regional blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeteaseProxy {
    pub host: Option<String>,
    pub protocol: String,
}

/// Extension trait bringing provider configuration keys onto [`Config`].
pub trait SourceConfigExt {
    /// `provider.<name>.enabled`, default true.
    fn provider_enabled(&self, name: &str) -> bool;

    /// `provider.netease.proxy.{host,protocol}`.
    fn netease_proxy(&self) -> NeteaseProxy;

    /// `provider.netease.member.cookie`, `None` when blank.
    fn netease_member_cookie(&self) -> Option<String>;

    /// `queue.max_track_duration_seconds`, 0 disables the check.
    fn max_track_duration_seconds(&self) -> u64;
}

impl SourceConfigExt for Config {
    fn provider_enabled(&self, name: &str) -> bool {
        self.get_bool_or(&["provider", name, "enabled"], true)
    }

    fn netease_proxy(&self) -> NeteaseProxy {
        let host = self.get_string_or(&["provider", "netease", "proxy", "host"], "");
        NeteaseProxy {
            host: if host.is_empty() { None } else { Some(host) },
            protocol: self.get_string_or(&["provider", "netease", "proxy", "protocol"], "https"),
        }
    }

    fn netease_member_cookie(&self) -> Option<String> {
        let cookie = self.get_string_or(&["provider", "netease", "member", "cookie"], "");
        if cookie.is_empty() {
            None
        } else {
            Some(cookie)
        }
    }

    fn max_track_duration_seconds(&self) -> u64 {
        self.get_u64_or(&["queue", "max_track_duration_seconds"], 3600)
    }
}

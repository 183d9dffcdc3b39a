//! Typed accessors for the `engine.*` section of the configuration.

use gkconfig::Config;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    /// Seconds an idle pump waits before detaching voice and exiting.
    pub idle_detach_seconds: u64,
    /// Whether to announce "your track is up next" for absent requesters.
    pub notify_absent_users: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            idle_detach_seconds: 300,
            notify_absent_users: true,
        }
    }
}

pub trait EngineConfigExt {
    fn engine_settings(&self) -> EngineSettings;
}

impl EngineConfigExt for Config {
    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            idle_detach_seconds: self.get_u64_or(&["engine", "idle_detach_seconds"], 300),
            notify_absent_users: self.get_bool_or(&["engine", "notify_absent_users"], true),
        }
    }
}

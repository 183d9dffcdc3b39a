//! Typed accessors for the `queue.*` section of the configuration.

use crate::tracker::{FairnessMode, QueueSettings};
use gkconfig::Config;

pub trait QueueConfigExt {
    fn queue_settings(&self) -> QueueSettings;
}

impl QueueConfigExt for Config {
    fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            max_pending_per_user: self.get_u64_or(&["queue", "max_pending_per_user"], 1) as usize,
            duplicate_threshold_queue_len: self
                .get_u64_or(&["queue", "duplicate_threshold_queue_len"], 5)
                as usize,
            fairness_mode: FairnessMode::parse(
                &self.get_string_or(&["queue", "fairness_mode"], "strict"),
            ),
            max_queue_length: self.get_u64_or(&["queue", "max_queue_length"], 100) as usize,
        }
    }
}

use chrono::{DateTime, Utc};
use gktrack::{GuildId, TrackDescriptor, TrackKey, UserId};

/// One requested track in a guild queue.
///
/// Carries the immutable descriptor plus a snapshot of the requester's
/// identity. The display name is captured at admission and may outlive the
/// user's session; the engine never holds a live user object (reachability
/// is asked of the voice transport at play time instead).
#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    pub descriptor: TrackDescriptor,
    pub requester_id: UserId,
    pub requester_display: String,
    pub guild_id: GuildId,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        descriptor: TrackDescriptor,
        requester_id: UserId,
        requester_display: impl Into<String>,
        guild_id: GuildId,
    ) -> Self {
        Self {
            descriptor,
            requester_id,
            requester_display: requester_display.into(),
            guild_id,
            enqueued_at: Utc::now(),
        }
    }

    /// Identity key of the underlying track. Entries with equal keys are
    /// still distinct entries when requested by different users.
    pub fn key(&self) -> TrackKey {
        TrackKey::from_descriptor(&self.descriptor)
    }

    pub fn title(&self) -> &str {
        &self.descriptor.title
    }
}

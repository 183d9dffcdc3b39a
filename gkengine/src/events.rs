//! Engine event stream.
//!
//! Outward-facing hooks for surfaces the engine deliberately does not
//! implement (status embeds, notifications). Delivered over a tokio
//! broadcast channel; slow subscribers lose old events rather than slowing
//! the engine down.

use gkqueue::QueueEntry;
use gktrack::GuildId;

#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// A track was handed to the voice transport.
    TrackStarted { guild_id: GuildId, entry: QueueEntry },
    /// A track left the player: natural end, skip, stop, or error.
    TrackFinished { guild_id: GuildId, entry: QueueEntry },
    /// The pump dropped a track because its requester was not reachable on
    /// the voice transport.
    RequesterAbsentSkip { guild_id: GuildId, entry: QueueEntry },
    /// The next track's requester is currently absent; their track comes up
    /// after the one that just started.
    UpNext { guild_id: GuildId, entry: QueueEntry },
    /// A guild queue was hydrated from its snapshot at startup.
    QueueRestored { guild_id: GuildId, pending: usize, has_current: bool },
    /// The pump drained its queue, waited out the idle timeout, and
    /// detached the voice session.
    PumpIdleDetached { guild_id: GuildId },
}

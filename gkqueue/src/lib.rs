//! # gkqueue
//!
//! Per-guild queue orchestration state for GrooveKeeper: the authoritative
//! FIFO queue with its `current` slot, the fairness/duplicate tracker that
//! mirrors it, and the durable JSON snapshot store.
//!
//! ## Architecture
//!
//! [`GuildQueue`] is a plain synchronous state machine — callers (the engine
//! facade and the playback pump) serialize access with a per-guild lock and
//! never perform I/O while holding it. [`FairnessTracker`] is a passive
//! witness: the queue owner reports entry lifecycle transitions through
//! `on_enqueued` / `on_start_play` / `on_finished` and the tracker answers
//! admission questions; it never mutates the queue. [`SnapshotStore`] turns
//! queue state into one JSON document per guild, written atomically (tmp +
//! fsync + rename) after every mutation and read back on engine start.
//!
//! The one discipline worth repeating: **peeking and consuming are different
//! operations**. Anything that renders "up next" uses [`GuildQueue::peek_next`];
//! only the playback pump ever calls [`GuildQueue::advance`], and only after
//! the previous track's stream has ended. Conflating the two is how queue
//! metadata ends up one track ahead of the audio.

mod config_ext;
mod entry;
mod error;
mod queue;
mod snapshot;
mod store;
mod tracker;

pub use config_ext::QueueConfigExt;
pub use entry::QueueEntry;
pub use error::{QueueError, Result};
pub use queue::{GuildQueue, QueueStatus};
pub use snapshot::{EntryRecord, QueueSnapshot, SNAPSHOT_SCHEMA};
pub use store::SnapshotStore;
pub use tracker::{FairnessMode, FairnessTracker, QueueSettings, RejectReason, UserQueueStatus};

//! The authoritative per-guild queue state machine.

use crate::entry::QueueEntry;
use crate::error::{QueueError, Result};
use crate::snapshot::{QueueSnapshot, SNAPSHOT_SCHEMA};
use gktrack::GuildId;
use std::collections::VecDeque;
use tracing::{debug, info};

/// FIFO queue plus the `current` slot for one guild.
///
/// Synchronous and I/O-free on purpose: callers hold the per-guild lock
/// around every call and persist the result afterwards, outside the lock.
/// Every state-changing operation bumps `revision`, so a snapshot can be
/// matched to the exact mutation it reflects.
#[derive(Debug)]
pub struct GuildQueue {
    guild_id: GuildId,
    pending: VecDeque<QueueEntry>,
    current: Option<QueueEntry>,
    revision: u64,
    paused_suspended: bool,
    max_queue_length: usize,
}

/// Immutable view of a queue for status rendering.
#[derive(Clone, Debug)]
pub struct QueueStatus {
    pub guild_id: GuildId,
    pub pending_len: usize,
    /// Sum of the pending entries' durations.
    pub total_duration_ms: u64,
    pub current: Option<QueueEntry>,
    pub up_next: Option<QueueEntry>,
    pub revision: u64,
    pub paused_suspended: bool,
}

impl GuildQueue {
    pub fn new(guild_id: GuildId, max_queue_length: usize) -> Self {
        Self {
            guild_id,
            pending: VecDeque::new(),
            current: None,
            revision: 0,
            paused_suspended: false,
            max_queue_length,
        }
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    pub fn current(&self) -> Option<&QueueEntry> {
        self.current.as_ref()
    }

    pub fn paused_suspended(&self) -> bool {
        self.paused_suspended
    }

    /// Set only while the host has torn down the voice session under us;
    /// cleared when the session is re-established.
    pub fn set_paused_suspended(&mut self, suspended: bool) {
        self.paused_suspended = suspended;
    }

    /// Appends an entry and returns its 1-based position in `pending`.
    pub fn enqueue(&mut self, entry: QueueEntry) -> Result<usize> {
        if self.pending.len() >= self.max_queue_length {
            return Err(QueueError::QueueFull(self.pending.len()));
        }
        debug!(guild = %self.guild_id, title = entry.title(), "Enqueued track");
        self.pending.push_back(entry);
        self.revision += 1;
        Ok(self.pending.len())
    }

    /// Head of `pending` without consuming it. Never changes state — this
    /// is what status rendering and up-next notifications must use.
    pub fn peek_next(&self) -> Option<&QueueEntry> {
        self.pending.front()
    }

    /// Moves the head of `pending` into `current`, discarding whatever was
    /// current before. Only the playback pump calls this, and only once the
    /// previous stream has ended.
    ///
    /// Returns the new current entry, or `None` when the queue is drained
    /// (the previous current is still discarded in that case).
    pub fn advance(&mut self) -> Option<QueueEntry> {
        let had_current = self.current.is_some();
        self.current = self.pending.pop_front();
        if had_current || self.current.is_some() {
            self.revision += 1;
        }
        if let Some(entry) = &self.current {
            info!(guild = %self.guild_id, title = entry.title(), "Advanced to next track");
        }
        self.current.clone()
    }

    /// Discards `current` without touching `pending`. No-op when nothing
    /// is playing. The pump's next [`GuildQueue::advance`] starts the
    /// following entry.
    pub fn skip_current(&mut self) -> Option<QueueEntry> {
        let skipped = self.current.take();
        if let Some(entry) = &skipped {
            info!(guild = %self.guild_id, title = entry.title(), "Skipped current track");
            self.revision += 1;
        }
        skipped
    }

    /// Removes the entry at a 1-based position in `pending`.
    pub fn remove_at(&mut self, position: usize) -> Result<QueueEntry> {
        if position == 0 || position > self.pending.len() {
            return Err(QueueError::OutOfRange(position));
        }
        let entry = self
            .pending
            .remove(position - 1)
            .ok_or(QueueError::OutOfRange(position))?;
        self.revision += 1;
        debug!(guild = %self.guild_id, title = entry.title(), position, "Removed pending track");
        Ok(entry)
    }

    /// Drops all pending entries, keeping `current`. Returns the dropped
    /// entries so the caller can finalize them with the tracker.
    pub fn clear(&mut self) -> Vec<QueueEntry> {
        if !self.pending.is_empty() {
            self.revision += 1;
        }
        let dropped: Vec<QueueEntry> = self.pending.drain(..).collect();
        info!(guild = %self.guild_id, count = dropped.len(), "Cleared pending queue");
        dropped
    }

    /// Drops `current` and all pending entries. Returns everything dropped,
    /// current first.
    pub fn stop(&mut self) -> Vec<QueueEntry> {
        let mut dropped = Vec::with_capacity(self.pending.len() + 1);
        if let Some(current) = self.current.take() {
            dropped.push(current);
        }
        dropped.extend(self.pending.drain(..));
        if !dropped.is_empty() {
            self.revision += 1;
        }
        info!(guild = %self.guild_id, count = dropped.len(), "Stopped and emptied queue");
        dropped
    }

    /// Serializable document describing the state at the current revision.
    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot::from_state(&self.guild_id, self.current.as_ref(), self.pending.iter())
    }

    /// Replaces this queue's state with a snapshot's content.
    ///
    /// The caller re-emits `on_enqueued` for every pending entry and
    /// `on_start_play` for the restored current entry so the fairness
    /// tracker catches up.
    pub fn restore(&mut self, snapshot: &QueueSnapshot) -> Result<()> {
        if snapshot.schema != SNAPSHOT_SCHEMA {
            return Err(QueueError::SchemaMismatch {
                expected: SNAPSHOT_SCHEMA,
                found: snapshot.schema,
            });
        }
        let (current, pending) = snapshot.to_entries(&self.guild_id);
        self.current = current;
        self.pending = pending;
        self.revision += 1;
        info!(
            guild = %self.guild_id,
            pending = self.pending.len(),
            has_current = self.current.is_some(),
            "Restored queue from snapshot"
        );
        Ok(())
    }

    /// Entries currently in `pending`, in play order.
    pub fn pending_entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.pending.iter()
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            guild_id: self.guild_id.clone(),
            pending_len: self.pending.len(),
            total_duration_ms: self
                .pending
                .iter()
                .map(|e| e.descriptor.duration_ms)
                .sum(),
            current: self.current.clone(),
            up_next: self.pending.front().cloned(),
            revision: self.revision,
            paused_suspended: self.paused_suspended,
        }
    }
}

//! On-disk snapshot document, schema version 1.
//!
//! A snapshot is self-contained: full descriptor fields plus the requester
//! identity, flattened into one record per entry. Identity keys are *not*
//! stored — they are re-derived on restore, which is why the derivation
//! rules share this schema's version number.

use crate::entry::QueueEntry;
use chrono::{DateTime, TimeZone, Utc};
use gktrack::{GuildId, SourceTag, TrackDescriptor, UserId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const SNAPSHOT_SCHEMA: u32 = 1;

/// One persisted queue entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub title: String,
    pub duration_ms: u64,
    pub canonical_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    pub source_tag: SourceTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub requester_id: String,
    pub requester_display: String,
    pub enqueued_at_ms: i64,
}

impl EntryRecord {
    pub fn from_entry(entry: &QueueEntry) -> Self {
        Self {
            title: entry.descriptor.title.clone(),
            duration_ms: entry.descriptor.duration_ms,
            canonical_url: entry.descriptor.canonical_url.clone(),
            uploader: entry.descriptor.uploader.clone(),
            source_tag: entry.descriptor.source_tag,
            thumbnail_url: entry.descriptor.thumbnail_url.clone(),
            requester_id: entry.requester_id.0.clone(),
            requester_display: entry.requester_display.clone(),
            enqueued_at_ms: entry.enqueued_at.timestamp_millis(),
        }
    }

    pub fn to_entry(&self, guild_id: &GuildId) -> QueueEntry {
        QueueEntry {
            descriptor: TrackDescriptor {
                title: self.title.clone(),
                duration_ms: self.duration_ms,
                canonical_url: self.canonical_url.clone(),
                uploader: self.uploader.clone(),
                thumbnail_url: self.thumbnail_url.clone(),
                source_tag: self.source_tag,
            },
            requester_id: UserId(self.requester_id.clone()),
            requester_display: self.requester_display.clone(),
            guild_id: guild_id.clone(),
            enqueued_at: parse_timestamp_ms(self.enqueued_at_ms),
        }
    }
}

fn parse_timestamp_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

/// The per-guild snapshot document written to
/// `<data_dir>/queues/<guild_id>.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub schema: u32,
    pub guild_id: String,
    pub current: Option<EntryRecord>,
    pub pending: Vec<EntryRecord>,
}

impl QueueSnapshot {
    pub fn from_state<'a>(
        guild_id: &GuildId,
        current: Option<&QueueEntry>,
        pending: impl Iterator<Item = &'a QueueEntry>,
    ) -> Self {
        Self {
            schema: SNAPSHOT_SCHEMA,
            guild_id: guild_id.0.clone(),
            current: current.map(EntryRecord::from_entry),
            pending: pending.map(EntryRecord::from_entry).collect(),
        }
    }

    /// Materializes the records back into queue entries.
    pub fn to_entries(&self, guild_id: &GuildId) -> (Option<QueueEntry>, VecDeque<QueueEntry>) {
        (
            self.current.as_ref().map(|r| r.to_entry(guild_id)),
            self.pending.iter().map(|r| r.to_entry(guild_id)).collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }
}

//! Fairness and duplicate tracking.
//!
//! The tracker mirrors queue state through the three lifecycle hooks and
//! answers one question: may this user add this track right now? It owns
//! two inverse maps (user → identity keys, key → users), per-user pending
//! lists, and the single currently-playing slot. Invariants:
//!
//! - the two maps are exact inverses at all times;
//! - a key is tracked iff some entry with that key sits in `pending` or
//!   `current` (same-key entries from one user are reference-counted so the
//!   short-queue exemption cannot desynchronize the maps);
//! - the currently-playing slot is occupied exactly between `on_start_play`
//!   and the matching `on_finished`.

use crate::entry::QueueEntry;
use gktrack::{TrackKey, UserId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Admission policy knobs, one instance per guild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    /// How many not-yet-playing entries one user may hold.
    pub max_pending_per_user: usize,
    /// Queue length below which the duplicate rule is waived; 0 disables
    /// the exemption entirely.
    pub duplicate_threshold_queue_len: usize,
    pub fairness_mode: FairnessMode,
    /// Hard cap on `pending` length per guild.
    pub max_queue_length: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_pending_per_user: 1,
            duplicate_threshold_queue_len: 5,
            fairness_mode: FairnessMode::Strict,
            max_queue_length: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FairnessMode {
    /// A user whose track is playing may not queue another one.
    Strict,
    /// Only the pending cap applies while a user's track is playing.
    Lenient,
}

impl FairnessMode {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "strict" => FairnessMode::Strict,
            "lenient" => FairnessMode::Lenient,
            other => {
                warn!(mode = other, "Unknown fairness mode, falling back to strict");
                FairnessMode::Strict
            }
        }
    }
}

/// Why an admission check said no.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// The user already has this exact track queued or playing.
    Duplicate,
    /// The user is at their pending-entry cap; payload is the current count.
    FairnessPending(usize),
    /// The user's track is playing right now (strict mode only).
    FairnessPlaying,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Duplicate => write!(f, "duplicate request for the same track"),
            RejectReason::FairnessPending(n) => {
                write!(f, "user already has {n} pending track(s)")
            }
            RejectReason::FairnessPlaying => write!(f, "user's track is currently playing"),
        }
    }
}

/// Per-user view for `my_status`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserQueueStatus {
    pub user_id: UserId,
    pub pending_count: usize,
    pub pending_titles: Vec<String>,
    pub is_currently_playing: bool,
    pub can_add_more: bool,
}

#[derive(Clone, Debug)]
struct PendingTrack {
    key: TrackKey,
    title: String,
}

/// Per-guild fairness state. A passive mirror of the guild queue: only the
/// lifecycle hooks mutate it, and they are called by whoever just mutated
/// the queue itself.
#[derive(Debug)]
pub struct FairnessTracker {
    settings: QueueSettings,
    user_keys: HashMap<UserId, HashSet<TrackKey>>,
    key_users: HashMap<TrackKey, HashSet<UserId>>,
    // same-user same-key entries are legal under the short-queue exemption
    key_refs: HashMap<(UserId, TrackKey), usize>,
    pending: HashMap<UserId, Vec<PendingTrack>>,
    currently_playing_user: Option<UserId>,
}

impl FairnessTracker {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            user_keys: HashMap::new(),
            key_users: HashMap::new(),
            key_refs: HashMap::new(),
            pending: HashMap::new(),
            currently_playing_user: None,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Admission check. `pending_len` is the guild queue's current pending
    /// length (the short-queue exemption is measured against it).
    ///
    /// Rules, in order:
    /// 1. exact duplicate for this user — rejected, unless the queue is
    ///    shorter than the duplicate threshold, in which case the request
    ///    is admitted outright;
    /// 2. per-user pending cap;
    /// 3. in strict mode, a user whose track is playing may not add another.
    ///
    /// The exemption is rule 1's escape hatch only: a non-duplicate request
    /// on a short queue still faces rules 2 and 3.
    pub fn can_admit(
        &self,
        user: &UserId,
        key: &TrackKey,
        pending_len: usize,
    ) -> Result<(), RejectReason> {
        let is_duplicate = self
            .user_keys
            .get(user)
            .map_or(false, |keys| keys.contains(key));

        if is_duplicate {
            let threshold = self.settings.duplicate_threshold_queue_len;
            if threshold > 0 && pending_len < threshold {
                debug!(%user, pending_len, threshold, "Duplicate admitted under short-queue exemption");
                return Ok(());
            }
            return Err(RejectReason::Duplicate);
        }

        let pending_count = self.pending_count(user);
        if pending_count >= self.settings.max_pending_per_user {
            return Err(RejectReason::FairnessPending(pending_count));
        }

        if self.settings.fairness_mode == FairnessMode::Strict
            && self.currently_playing_user.as_ref() == Some(user)
        {
            return Err(RejectReason::FairnessPlaying);
        }

        Ok(())
    }

    /// Entry accepted into `pending`.
    pub fn on_enqueued(&mut self, entry: &QueueEntry) {
        let key = entry.key();
        let user = entry.requester_id.clone();

        *self.key_refs.entry((user.clone(), key.clone())).or_insert(0) += 1;
        self.user_keys
            .entry(user.clone())
            .or_default()
            .insert(key.clone());
        self.key_users
            .entry(key.clone())
            .or_default()
            .insert(user.clone());
        self.pending.entry(user).or_default().push(PendingTrack {
            key,
            title: entry.title().to_string(),
        });
    }

    /// Entry moved from `pending` to `current`.
    pub fn on_start_play(&mut self, entry: &QueueEntry) {
        let key = entry.key();
        let user = &entry.requester_id;

        self.currently_playing_user = Some(user.clone());
        self.remove_pending(user, &key);
    }

    /// Entry left the queue for good: finished, skipped, removed, or
    /// dropped by clear/stop. Tolerant of entries it no longer tracks.
    pub fn on_finished(&mut self, entry: &QueueEntry) {
        let key = entry.key();
        let user = &entry.requester_id;

        if self.currently_playing_user.as_ref() == Some(user) {
            self.currently_playing_user = None;
        }

        // an entry that never reached `current` is still on the pending list
        self.remove_pending(user, &key);

        let ref_key = (user.clone(), key.clone());
        match self.key_refs.get_mut(&ref_key) {
            Some(refs) if *refs > 1 => {
                *refs -= 1;
            }
            Some(_) => {
                self.key_refs.remove(&ref_key);
                if let Some(keys) = self.user_keys.get_mut(user) {
                    keys.remove(&key);
                    if keys.is_empty() {
                        self.user_keys.remove(user);
                    }
                }
                if let Some(users) = self.key_users.get_mut(&key) {
                    users.remove(user);
                    if users.is_empty() {
                        self.key_users.remove(&key);
                    }
                }
            }
            None => {
                debug!(%user, "on_finished for an untracked entry, ignoring");
            }
        }
    }

    fn remove_pending(&mut self, user: &UserId, key: &TrackKey) {
        if let Some(list) = self.pending.get_mut(user) {
            if let Some(pos) = list.iter().position(|p| &p.key == key) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.pending.remove(user);
            }
        }
    }

    pub fn pending_count(&self, user: &UserId) -> usize {
        self.pending.get(user).map_or(0, Vec::len)
    }

    pub fn currently_playing_user(&self) -> Option<&UserId> {
        self.currently_playing_user.as_ref()
    }

    /// Number of tracked entries (reference-counted, so it equals
    /// `|pending| + 1` while a track is playing).
    pub fn tracked_entry_count(&self) -> usize {
        self.key_refs.values().sum()
    }

    pub fn user_status(&self, user: &UserId) -> UserQueueStatus {
        let pending_count = self.pending_count(user);
        let is_currently_playing = self.currently_playing_user.as_ref() == Some(user);
        UserQueueStatus {
            user_id: user.clone(),
            pending_count,
            pending_titles: self
                .pending
                .get(user)
                .map(|l| l.iter().map(|p| p.title.clone()).collect())
                .unwrap_or_default(),
            is_currently_playing,
            can_add_more: pending_count < self.settings.max_pending_per_user
                && !(self.settings.fairness_mode == FairnessMode::Strict
                    && is_currently_playing),
        }
    }

    /// Debug assertion that the forward and inverse maps agree. Cheap
    /// enough for tests, not called in production paths.
    pub fn maps_are_inverse(&self) -> bool {
        let forward_ok = self.user_keys.iter().all(|(user, keys)| {
            keys.iter().all(|key| {
                self.key_users
                    .get(key)
                    .map_or(false, |users| users.contains(user))
            })
        });
        let backward_ok = self.key_users.iter().all(|(key, users)| {
            users.iter().all(|user| {
                self.user_keys
                    .get(user)
                    .map_or(false, |keys| keys.contains(key))
            })
        });
        forward_ok && backward_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gktrack::{GuildId, SourceTag, TrackDescriptor};

    fn entry(user: &str, title: &str, url: &str) -> QueueEntry {
        QueueEntry::new(
            TrackDescriptor {
                title: title.to_string(),
                duration_ms: 180_000,
                canonical_url: url.to_string(),
                uploader: None,
                thumbnail_url: None,
                source_tag: SourceTag::Generic,
            },
            UserId::from(user),
            user.to_uppercase(),
            GuildId::from("g1"),
        )
    }

    fn tracker() -> FairnessTracker {
        FairnessTracker::new(QueueSettings::default())
    }

    #[test]
    fn test_admit_fresh_track() {
        let t = tracker();
        let e = entry("alice", "Song A", "https://example.com/a.mp3");
        assert_eq!(t.can_admit(&e.requester_id, &e.key(), 0), Ok(()));
    }

    #[test]
    fn test_duplicate_rejected_on_long_queue() {
        let mut t = tracker();
        let e = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&e);
        // queue at the threshold: no exemption
        assert_eq!(
            t.can_admit(&e.requester_id, &e.key(), 5),
            Err(RejectReason::Duplicate)
        );
    }

    #[test]
    fn test_duplicate_exemption_on_short_queue() {
        let mut t = tracker();
        let e = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&e);
        // short queue: the duplicate is waved through
        assert_eq!(t.can_admit(&e.requester_id, &e.key(), 2), Ok(()));
    }

    #[test]
    fn test_exemption_disabled_by_zero_threshold() {
        let mut t = FairnessTracker::new(QueueSettings {
            duplicate_threshold_queue_len: 0,
            ..QueueSettings::default()
        });
        let e = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&e);
        assert_eq!(
            t.can_admit(&e.requester_id, &e.key(), 0),
            Err(RejectReason::Duplicate)
        );
    }

    #[test]
    fn test_exemption_never_applies_to_pending_cap() {
        let mut t = tracker();
        let a = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&a);
        // different track, short queue: the pending cap still applies
        let b = entry("alice", "Song B", "https://example.com/b.mp3");
        assert_eq!(
            t.can_admit(&b.requester_id, &b.key(), 1),
            Err(RejectReason::FairnessPending(1))
        );
    }

    #[test]
    fn test_currently_playing_strict_vs_lenient() {
        let mut t = tracker();
        let a = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&a);
        t.on_start_play(&a);

        let b = entry("alice", "Song B", "https://example.com/b.mp3");
        assert_eq!(
            t.can_admit(&b.requester_id, &b.key(), 6),
            Err(RejectReason::FairnessPlaying)
        );

        let mut lenient = FairnessTracker::new(QueueSettings {
            fairness_mode: FairnessMode::Lenient,
            ..QueueSettings::default()
        });
        lenient.on_enqueued(&a);
        lenient.on_start_play(&a);
        assert_eq!(lenient.can_admit(&b.requester_id, &b.key(), 6), Ok(()));
    }

    #[test]
    fn test_lifecycle_clears_state() {
        let mut t = tracker();
        let a = entry("alice", "Song A", "https://example.com/a.mp3");

        t.on_enqueued(&a);
        assert_eq!(t.pending_count(&a.requester_id), 1);
        assert_eq!(t.tracked_entry_count(), 1);

        t.on_start_play(&a);
        assert_eq!(t.pending_count(&a.requester_id), 0);
        assert_eq!(t.currently_playing_user(), Some(&a.requester_id));
        // key stays tracked while the entry is current
        assert_eq!(t.tracked_entry_count(), 1);

        t.on_finished(&a);
        assert_eq!(t.currently_playing_user(), None);
        assert_eq!(t.tracked_entry_count(), 0);
        assert!(t.maps_are_inverse());
    }

    #[test]
    fn test_finished_without_start_drops_pending() {
        // remove_at / clear paths: the entry dies while still pending
        let mut t = tracker();
        let a = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&a);
        t.on_finished(&a);
        assert_eq!(t.pending_count(&a.requester_id), 0);
        assert_eq!(t.tracked_entry_count(), 0);
    }

    #[test]
    fn test_refcounted_duplicate_entries() {
        // the exemption lets one user hold the same key twice; the maps
        // must survive one of the two copies finishing
        let mut t = FairnessTracker::new(QueueSettings {
            max_pending_per_user: 5,
            ..QueueSettings::default()
        });
        let a = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&a);
        t.on_enqueued(&a);
        assert_eq!(t.tracked_entry_count(), 2);
        assert!(t.maps_are_inverse());

        t.on_finished(&a);
        assert_eq!(t.tracked_entry_count(), 1);
        // still a duplicate for alice on a long queue
        assert_eq!(
            t.can_admit(&a.requester_id, &a.key(), 9),
            Err(RejectReason::Duplicate)
        );

        t.on_finished(&a);
        assert_eq!(t.tracked_entry_count(), 0);
        assert_eq!(t.can_admit(&a.requester_id, &a.key(), 9), Ok(()));
        assert!(t.maps_are_inverse());
    }

    #[test]
    fn test_same_key_different_users() {
        let mut t = tracker();
        let a = entry("alice", "Song A", "https://example.com/a.mp3");
        let b = entry("bob", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&a);
        t.on_enqueued(&b);
        assert!(t.maps_are_inverse());
        assert_eq!(t.tracked_entry_count(), 2);

        // finishing alice's copy leaves bob's tracked
        t.on_finished(&a);
        assert_eq!(
            t.can_admit(&b.requester_id, &b.key(), 9),
            Err(RejectReason::Duplicate)
        );
        assert_eq!(t.can_admit(&a.requester_id, &a.key(), 9), Ok(()));
    }

    #[test]
    fn test_user_status() {
        let mut t = tracker();
        let a = entry("alice", "Song A", "https://example.com/a.mp3");
        t.on_enqueued(&a);

        let status = t.user_status(&a.requester_id);
        assert_eq!(status.pending_count, 1);
        assert_eq!(status.pending_titles, vec!["Song A".to_string()]);
        assert!(!status.is_currently_playing);
        assert!(!status.can_add_more);

        t.on_start_play(&a);
        let status = t.user_status(&a.requester_id);
        assert_eq!(status.pending_count, 0);
        assert!(status.is_currently_playing);
        assert!(!status.can_add_more);

        t.on_finished(&a);
        let status = t.user_status(&a.requester_id);
        assert!(status.can_add_more);
    }

    #[test]
    fn test_fairness_mode_parse() {
        assert_eq!(FairnessMode::parse("strict"), FairnessMode::Strict);
        assert_eq!(FairnessMode::parse("LENIENT"), FairnessMode::Lenient);
        assert_eq!(FairnessMode::parse("bogus"), FairnessMode::Strict);
    }
}

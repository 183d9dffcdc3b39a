//! Scriptable in-process transport used by the integration tests.
//!
//! Plays nothing: `play` registers the stream and hands control to the
//! test, which ends it with [`LoopbackTransport::finish_current`] or
//! [`LoopbackTransport::fail_current`], or pre-scripts outcomes for races
//! the test cannot time. A play counter watch channel lets tests wait for
//! the pump to reach the streaming step without sleeping.

use super::{PlayHandle, PlayOutcome, PlaySignal, TransportErrorKind, VoiceError, VoiceTransport};
use async_trait::async_trait;
use gktrack::{GuildId, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use tokio::sync::watch;

#[derive(Default)]
struct LoopbackState {
    attached: HashSet<GuildId>,
    reachable: HashSet<(GuildId, UserId)>,
    active: HashMap<GuildId, PlaySignal>,
    scripted: HashMap<GuildId, VecDeque<PlayOutcome>>,
    played: Vec<(GuildId, String)>,
    paused: HashSet<GuildId>,
    overlapping_play: bool,
}

pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
    play_count_tx: watch::Sender<u64>,
    play_count_rx: watch::Receiver<u64>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (play_count_tx, play_count_rx) = watch::channel(0);
        Self {
            state: Mutex::new(LoopbackState::default()),
            play_count_tx,
            play_count_rx,
        }
    }

    /// Marks a user as present on the guild's voice channel.
    pub fn mark_reachable(&self, guild_id: &GuildId, user: &UserId) {
        self.state
            .lock()
            .unwrap()
            .reachable
            .insert((guild_id.clone(), user.clone()));
    }

    pub fn mark_unreachable(&self, guild_id: &GuildId, user: &UserId) {
        self.state
            .lock()
            .unwrap()
            .reachable
            .remove(&(guild_id.clone(), user.clone()));
    }

    /// Queues an outcome consumed by the *next* `play` call, which then
    /// completes immediately instead of waiting for the test.
    pub fn script_outcome(&self, guild_id: &GuildId, outcome: PlayOutcome) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .entry(guild_id.clone())
            .or_default()
            .push_back(outcome);
    }

    /// Ends the active stream with a natural finish.
    pub fn finish_current(&self, guild_id: &GuildId) -> bool {
        self.complete(guild_id, PlayOutcome::Finished)
    }

    /// Ends the active stream with a transport error.
    pub fn fail_current(&self, guild_id: &GuildId, kind: TransportErrorKind) -> bool {
        self.complete(guild_id, PlayOutcome::TransportError(kind))
    }

    fn complete(&self, guild_id: &GuildId, outcome: PlayOutcome) -> bool {
        let signal = self.state.lock().unwrap().active.remove(guild_id);
        match signal {
            Some(signal) => {
                signal.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Every URL handed to `play`, in order.
    pub fn played_urls(&self, guild_id: &GuildId) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .played
            .iter()
            .filter(|(g, _)| g == guild_id)
            .map(|(_, url)| url.clone())
            .collect()
    }

    pub fn total_play_count(&self) -> u64 {
        *self.play_count_rx.borrow()
    }

    /// Waits until the transport has seen at least `count` play calls.
    pub async fn wait_for_play_count(&self, count: u64) {
        let mut rx = self.play_count_rx.clone();
        while *rx.borrow_and_update() < count {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// True if two plays for one guild ever overlapped — the single-flight
    /// contract violation the pump must make impossible.
    pub fn overlap_detected(&self) -> bool {
        self.state.lock().unwrap().overlapping_play
    }

    pub fn is_streaming(&self, guild_id: &GuildId) -> bool {
        self.state.lock().unwrap().active.contains_key(guild_id)
    }
}

#[async_trait]
impl VoiceTransport for LoopbackTransport {
    async fn attach(&self, guild_id: &GuildId, _channel: &str) -> Result<(), VoiceError> {
        self.state.lock().unwrap().attached.insert(guild_id.clone());
        Ok(())
    }

    async fn detach(&self, guild_id: &GuildId) {
        let mut state = self.state.lock().unwrap();
        state.attached.remove(guild_id);
        if let Some(signal) = state.active.remove(guild_id) {
            signal.complete(PlayOutcome::Stopped);
        }
    }

    async fn play(&self, guild_id: &GuildId, url: &str) -> Result<PlayHandle, VoiceError> {
        let (handle, signal) = PlayHandle::channel();
        {
            let mut state = self.state.lock().unwrap();
            if state.active.contains_key(guild_id) {
                state.overlapping_play = true;
            }
            state.played.push((guild_id.clone(), url.to_string()));

            let scripted = state
                .scripted
                .get_mut(guild_id)
                .and_then(|q| q.pop_front());
            match scripted {
                Some(outcome) => signal.complete(outcome),
                None => {
                    state.active.insert(guild_id.clone(), signal);
                }
            }
        }
        self.play_count_tx.send_modify(|c| *c += 1);
        Ok(handle)
    }

    async fn stop(&self, guild_id: &GuildId) {
        self.complete(guild_id, PlayOutcome::Stopped);
    }

    async fn pause(&self, guild_id: &GuildId) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.active.contains_key(guild_id) {
            state.paused.insert(guild_id.clone());
            true
        } else {
            false
        }
    }

    async fn resume(&self, guild_id: &GuildId) -> bool {
        self.state.lock().unwrap().paused.remove(guild_id)
    }

    async fn is_attached(&self, guild_id: &GuildId) -> bool {
        self.state.lock().unwrap().attached.contains(guild_id)
    }

    async fn is_user_reachable(&self, guild_id: &GuildId, user: &UserId) -> bool {
        self.state
            .lock()
            .unwrap()
            .reachable
            .contains(&(guild_id.clone(), user.clone()))
    }
}

//! The engine facade: the only public mutation surface of GrooveKeeper.

use crate::config_ext::{EngineConfigExt, EngineSettings};
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::pump::{self, PumpCommand, PumpContext, PumpHandle};
use crate::voice::{VoiceSessionManager, VoiceTransport};
use gkconfig::Config;
use gkqueue::{
    FairnessTracker, GuildQueue, QueueConfigExt, QueueEntry, QueueSettings, QueueSnapshot,
    QueueStatus, RejectReason, SnapshotStore, UserQueueStatus,
};
use gksource::{ProviderRegistry, SourceError};
use gktrack::{GuildId, TrackDescriptor, UserId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Queue and tracker for one guild, mutated together under one lock.
///
/// Every critical section over this pair is fast and free of I/O; network
/// and disk work happens outside, with results applied in a later section.
pub(crate) struct GuildSync {
    pub queue: GuildQueue,
    pub tracker: FairnessTracker,
}

pub(crate) struct GuildState {
    pub sync: Mutex<GuildSync>,
    /// Revision of the last snapshot written for this guild; writers skip
    /// saves that would go backwards.
    pub persist: Mutex<u64>,
}

impl GuildState {
    fn new(guild_id: GuildId, settings: &QueueSettings) -> Self {
        Self {
            sync: Mutex::new(GuildSync {
                queue: GuildQueue::new(guild_id, settings.max_queue_length),
                tracker: FairnessTracker::new(settings.clone()),
            }),
            persist: Mutex::new(0),
        }
    }
}

/// Writes a snapshot captured at `revision`, serializing writers per guild
/// and dropping stale writes so the on-disk document never goes backwards.
pub(crate) async fn persist_snapshot(
    state: &GuildState,
    store: &SnapshotStore,
    snapshot: QueueSnapshot,
    revision: u64,
) {
    let mut last_saved = state.persist.lock().await;
    if revision <= *last_saved {
        return;
    }
    match store.save(&snapshot).await {
        Ok(()) => *last_saved = revision,
        Err(err) => {
            warn!(guild = %snapshot.guild_id, error = %err, "Failed to persist queue snapshot");
        }
    }
}

/// Why a submission was turned down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectKind {
    Duplicate,
    FairnessPending,
    FairnessPlaying,
    Unsupported,
    ExtractFailed,
    QueueFull,
    TrackTooLong,
}

impl RejectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectKind::Duplicate => "duplicate",
            RejectKind::FairnessPending => "fairness_pending",
            RejectKind::FairnessPlaying => "fairness_playing",
            RejectKind::Unsupported => "unsupported",
            RejectKind::ExtractFailed => "extract_failed",
            RejectKind::QueueFull => "queue_full",
            RejectKind::TrackTooLong => "track_too_long",
        }
    }
}

impl From<RejectReason> for RejectKind {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::Duplicate => RejectKind::Duplicate,
            RejectReason::FairnessPending(_) => RejectKind::FairnessPending,
            RejectReason::FairnessPlaying => RejectKind::FairnessPlaying,
        }
    }
}

/// Result of a submission. Rejections are ordinary outcomes, reported
/// synchronously and with no side effects on queue state.
#[derive(Clone, Debug)]
pub enum SubmitOutcome {
    Enqueued {
        /// 1-based position in the pending queue.
        position: usize,
        descriptor: TrackDescriptor,
    },
    Rejected {
        reason: RejectKind,
        detail: String,
    },
}

impl SubmitOutcome {
    fn rejected(reason: RejectKind, detail: impl Into<String>) -> Self {
        SubmitOutcome::Rejected {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_enqueued(&self) -> bool {
        matches!(self, SubmitOutcome::Enqueued { .. })
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            SubmitOutcome::Enqueued { position, .. } => Some(*position),
            SubmitOutcome::Rejected { .. } => None,
        }
    }

    pub fn reject_reason(&self) -> Option<RejectKind> {
        match self {
            SubmitOutcome::Rejected { reason, .. } => Some(*reason),
            SubmitOutcome::Enqueued { .. } => None,
        }
    }
}

struct EngineInner {
    engine_settings: EngineSettings,
    queue_settings: QueueSettings,
    registry: Arc<ProviderRegistry>,
    store: SnapshotStore,
    sessions: Arc<VoiceSessionManager>,
    guilds: RwLock<HashMap<GuildId, Arc<GuildState>>>,
    pumps: Mutex<HashMap<GuildId, PumpHandle>>,
    events: broadcast::Sender<EngineEvent>,
    cancel: CancellationToken,
}

/// The multi-tenant playback engine.
///
/// Cheap to clone; all clones share one state. Typical lifecycle:
/// [`Engine::builder`] → [`Engine::start`] (hydrates queues from disk) →
/// submissions and playback → [`Engine::shutdown`].
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Subscribes to the engine event stream.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn sessions(&self) -> &Arc<VoiceSessionManager> {
        &self.inner.sessions
    }

    /// Hydrates every guild that has a snapshot on disk and starts pumps
    /// for the non-empty ones. Corrupt snapshots leave their guild empty;
    /// a schema mismatch aborts only that guild's restore.
    pub async fn start(&self) -> Result<()> {
        for guild_id in self.inner.store.list_guilds() {
            let snapshot = match self.inner.store.load(&guild_id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(err) => {
                    warn!(guild = %guild_id, error = %err, "Failed to read queue snapshot");
                    continue;
                }
            };
            if snapshot.is_empty() {
                continue;
            }

            let state = self.guild_state(&guild_id).await;
            let restored = {
                let mut st = state.sync.lock().await;
                match st.queue.restore(&snapshot) {
                    Ok(()) => {
                        let current = st.queue.current().cloned();
                        let pending: Vec<QueueEntry> =
                            st.queue.pending_entries().cloned().collect();
                        if let Some(cur) = &current {
                            st.tracker.on_enqueued(cur);
                        }
                        for entry in &pending {
                            st.tracker.on_enqueued(entry);
                        }
                        if let Some(cur) = &current {
                            st.tracker.on_start_play(cur);
                        }
                        Some((current.is_some(), pending.len()))
                    }
                    Err(err) => {
                        warn!(guild = %guild_id, error = %err, "Queue restore failed");
                        None
                    }
                }
            };

            let Some((has_current, pending)) = restored else {
                continue;
            };

            info!(guild = %guild_id, pending, has_current, "Queue restored from snapshot");
            let _ = self.inner.events.send(EngineEvent::QueueRestored {
                guild_id: guild_id.clone(),
                pending,
                has_current,
            });
            self.ensure_pump(&guild_id, &state, has_current).await;
        }
        Ok(())
    }

    /// Submits a track request: recognize → extract → admit → enqueue →
    /// persist → make sure the guild's pump runs.
    pub async fn submit(
        &self,
        guild_id: &GuildId,
        user: &UserId,
        user_display: &str,
        url: &str,
    ) -> SubmitOutcome {
        if self.inner.registry.recognize(url).is_none() {
            return SubmitOutcome::rejected(
                RejectKind::Unsupported,
                format!("no provider recognizes {url}"),
            );
        }

        // network extraction happens before any lock is taken
        let descriptor = match self.inner.registry.extract(url, &self.inner.cancel).await {
            Ok(descriptor) => descriptor,
            Err(SourceError::Unsupported(detail)) => {
                return SubmitOutcome::rejected(RejectKind::Unsupported, detail)
            }
            Err(SourceError::TrackTooLong(secs)) => {
                return SubmitOutcome::rejected(
                    RejectKind::TrackTooLong,
                    format!("track is {secs} s long"),
                )
            }
            Err(err) => return SubmitOutcome::rejected(RejectKind::ExtractFailed, err.to_string()),
        };

        let entry = QueueEntry::new(
            descriptor.clone(),
            user.clone(),
            user_display,
            guild_id.clone(),
        );
        let key = entry.key();

        let state = self.guild_state(guild_id).await;
        let (position, snapshot, revision) = {
            let mut st = state.sync.lock().await;

            if let Err(reason) = st.tracker.can_admit(user, &key, st.queue.pending_len()) {
                let detail = reason.to_string();
                return SubmitOutcome::rejected(RejectKind::from(reason), detail);
            }

            let position = match st.queue.enqueue(entry.clone()) {
                Ok(position) => position,
                Err(err) => {
                    return SubmitOutcome::rejected(RejectKind::QueueFull, err.to_string())
                }
            };
            st.tracker.on_enqueued(&entry);
            (position, st.queue.snapshot(), st.queue.revision())
        };
        persist_snapshot(&state, &self.inner.store, snapshot, revision).await;

        info!(
            guild = %guild_id,
            user = %user,
            title = %descriptor.title,
            position,
            "Track admitted to queue"
        );
        self.ensure_pump(guild_id, &state, false).await;

        SubmitOutcome::Enqueued {
            position,
            descriptor,
        }
    }

    /// Skips the currently playing track. Returns the skipped entry.
    ///
    /// Like [`Engine::stop`], this completes in bounded time: the `current`
    /// slot is discarded under the guild lock first, so status views reflect
    /// the skip immediately, and the pump is signalled second so the stream
    /// is torn down and the next entry advanced.
    pub async fn skip(&self, guild_id: &GuildId) -> Result<QueueEntry> {
        let state = self
            .inner
            .guilds
            .read()
            .await
            .get(guild_id)
            .cloned()
            .ok_or(EngineError::NotPlaying)?;

        let (skipped, snapshot, revision) = {
            let mut st = state.sync.lock().await;
            let skipped = st.queue.skip_current().ok_or(EngineError::NotPlaying)?;
            st.tracker.on_finished(&skipped);
            (skipped, st.queue.snapshot(), st.queue.revision())
        };
        persist_snapshot(&state, &self.inner.store, snapshot, revision).await;

        let pumps = self.inner.pumps.lock().await;
        match pumps.get(guild_id) {
            Some(handle) if !handle.join.is_finished() => {
                let _ = handle.tx.send(PumpCommand::Skip).await;
            }
            _ => {
                // no live pump; make sure the transport is not left playing
                self.inner.sessions.stop(guild_id).await;
            }
        }

        info!(guild = %guild_id, title = skipped.title(), "Skipped current track");
        Ok(skipped)
    }

    /// Stops playback and empties the queue. Returns the number of entries
    /// dropped. Completes in bounded time regardless of stream state.
    pub async fn stop(&self, guild_id: &GuildId) -> Result<usize> {
        let state = self.guild_state(guild_id).await;
        let (dropped, snapshot, revision) = {
            let mut st = state.sync.lock().await;
            let dropped = st.queue.stop();
            for entry in &dropped {
                st.tracker.on_finished(entry);
            }
            st.queue.set_paused_suspended(false);
            (dropped.len(), st.queue.snapshot(), st.queue.revision())
        };
        persist_snapshot(&state, &self.inner.store, snapshot, revision).await;

        if let Some(handle) = self.inner.pumps.lock().await.get(guild_id) {
            let _ = handle.tx.send(PumpCommand::Stop).await;
        }

        info!(guild = %guild_id, dropped, "Stopped playback and emptied the queue");
        Ok(dropped)
    }

    /// Removes the pending entry at a 1-based position.
    pub async fn remove_at(&self, guild_id: &GuildId, position: usize) -> Result<QueueEntry> {
        let state = self.guild_state(guild_id).await;
        let (entry, snapshot, revision) = {
            let mut st = state.sync.lock().await;
            let entry = st.queue.remove_at(position)?;
            st.tracker.on_finished(&entry);
            (entry, st.queue.snapshot(), st.queue.revision())
        };
        persist_snapshot(&state, &self.inner.store, snapshot, revision).await;
        Ok(entry)
    }

    /// Drops all pending entries, keeping the current track playing.
    pub async fn clear(&self, guild_id: &GuildId) -> Result<usize> {
        let state = self.guild_state(guild_id).await;
        let (dropped, snapshot, revision) = {
            let mut st = state.sync.lock().await;
            let dropped = st.queue.clear();
            for entry in &dropped {
                st.tracker.on_finished(entry);
            }
            (dropped.len(), st.queue.snapshot(), st.queue.revision())
        };
        persist_snapshot(&state, &self.inner.store, snapshot, revision).await;
        Ok(dropped)
    }

    /// Attaches the guild's voice session and resumes a host-suspended
    /// pump, if any.
    pub async fn attach(&self, guild_id: &GuildId, channel: &str) -> Result<()> {
        self.inner.sessions.attach(guild_id, channel).await?;
        self.clear_suspension(guild_id).await;
        Ok(())
    }

    pub async fn pause(&self, guild_id: &GuildId) -> bool {
        self.inner.sessions.pause(guild_id).await
    }

    pub async fn resume(&self, guild_id: &GuildId) -> bool {
        let resumed = self.inner.sessions.resume(guild_id).await;
        self.clear_suspension(guild_id).await;
        resumed
    }

    pub async fn status(&self, guild_id: &GuildId) -> QueueStatus {
        let state = self.inner.guilds.read().await.get(guild_id).cloned();
        match state {
            Some(state) => state.sync.lock().await.queue.status(),
            None => GuildQueue::new(
                guild_id.clone(),
                self.inner.queue_settings.max_queue_length,
            )
            .status(),
        }
    }

    pub async fn my_status(&self, guild_id: &GuildId, user: &UserId) -> UserQueueStatus {
        let state = self.inner.guilds.read().await.get(guild_id).cloned();
        match state {
            Some(state) => state.sync.lock().await.tracker.user_status(user),
            None => FairnessTracker::new(self.inner.queue_settings.clone()).user_status(user),
        }
    }

    /// Snapshots every guild, terminates every pump, cancels in-flight
    /// provider calls, and detaches all voice sessions.
    pub async fn shutdown(&self) {
        info!("Engine shutting down");
        self.inner.cancel.cancel();

        let pumps: Vec<(GuildId, PumpHandle)> =
            self.inner.pumps.lock().await.drain().collect();
        for (guild_id, handle) in pumps {
            let _ = handle.tx.send(PumpCommand::Shutdown).await;
            if let Err(err) = handle.join.await {
                warn!(guild = %guild_id, error = %err, "Pump task ended abnormally");
            }
        }

        let guilds: Vec<(GuildId, Arc<GuildState>)> = self
            .inner
            .guilds
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (_, state) in guilds {
            let (snapshot, revision) = {
                let st = state.sync.lock().await;
                (st.queue.snapshot(), st.queue.revision())
            };
            persist_snapshot(&state, &self.inner.store, snapshot, revision).await;
        }

        self.inner.sessions.detach_all().await;
        info!("Engine shutdown complete");
    }

    async fn guild_state(&self, guild_id: &GuildId) -> Arc<GuildState> {
        if let Some(state) = self.inner.guilds.read().await.get(guild_id) {
            return state.clone();
        }
        let mut guilds = self.inner.guilds.write().await;
        guilds
            .entry(guild_id.clone())
            .or_insert_with(|| {
                Arc::new(GuildState::new(
                    guild_id.clone(),
                    &self.inner.queue_settings,
                ))
            })
            .clone()
    }

    async fn clear_suspension(&self, guild_id: &GuildId) {
        let state = self.inner.guilds.read().await.get(guild_id).cloned();
        if let Some(state) = state {
            let was_suspended = {
                let mut st = state.sync.lock().await;
                let was = st.queue.paused_suspended();
                st.queue.set_paused_suspended(false);
                was
            };
            if was_suspended {
                if let Some(handle) = self.inner.pumps.lock().await.get(guild_id) {
                    let _ = handle.tx.try_send(PumpCommand::Wake);
                }
            }
        }
    }

    /// Spawns the guild's pump if it is not running, or nudges it awake.
    async fn ensure_pump(
        &self,
        guild_id: &GuildId,
        state: &Arc<GuildState>,
        resume_restored_current: bool,
    ) {
        let mut pumps = self.inner.pumps.lock().await;
        if let Some(handle) = pumps.get(guild_id) {
            if !handle.join.is_finished() {
                // a full mailbox already holds a pending wake-up
                let _ = handle.tx.try_send(PumpCommand::Wake);
                return;
            }
            pumps.remove(guild_id);
        }

        let (tx, rx) = mpsc::channel(16);
        let ctx = PumpContext {
            guild_id: guild_id.clone(),
            state: state.clone(),
            registry: self.inner.registry.clone(),
            store: self.inner.store.clone(),
            sessions: self.inner.sessions.clone(),
            events: self.inner.events.clone(),
            settings: self.inner.engine_settings.clone(),
            cancel: self.inner.cancel.child_token(),
            resume_restored_current,
        };
        let join = tokio::spawn(pump::run(ctx, rx));
        pumps.insert(guild_id.clone(), PumpHandle { tx, join });
    }
}

/// Assembles an [`Engine`] from its collaborators.
#[derive(Default)]
pub struct EngineBuilder {
    transport: Option<Arc<dyn VoiceTransport>>,
    config: Option<Arc<Config>>,
    registry: Option<Arc<ProviderRegistry>>,
    data_dir: Option<PathBuf>,
}

impl EngineBuilder {
    /// The chat platform's audio transport. Required.
    pub fn transport(mut self, transport: Arc<dyn VoiceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Configuration to read settings from; defaults to the process-wide
    /// configuration.
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the provider registry (tests inject stub providers here).
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Overrides `host.data_dir` from the configuration.
    pub fn data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let transport = self.transport.ok_or(EngineError::MissingTransport)?;
        let config = self.config.unwrap_or_else(gkconfig::get_config);
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ProviderRegistry::from_config(&config)));
        let data_dir = self.data_dir.unwrap_or_else(|| config.get_data_dir());
        let store = SnapshotStore::new(&data_dir)?;
        let (events, _) = broadcast::channel(64);

        Ok(Engine {
            inner: Arc::new(EngineInner {
                engine_settings: config.engine_settings(),
                queue_settings: config.queue_settings(),
                registry,
                store,
                sessions: Arc::new(VoiceSessionManager::new(transport)),
                guilds: RwLock::new(HashMap::new()),
                pumps: Mutex::new(HashMap::new()),
                events,
                cancel: CancellationToken::new(),
            }),
        })
    }
}

//! The per-guild playback pump: a single-flight loop over the queue.
//!
//! One pump task per guild, spawned lazily on the first admitted track and
//! wound down after the queue drains and the idle timeout passes. The pump
//! owns the only call site of `GuildQueue::advance`, so at most one track
//! per guild is ever being resolved or streamed.
//!
//! Control arrives exclusively through the command mailbox — skip, stop,
//! and shutdown are messages, never shared flags — and takes effect by
//! stopping the transport, which completes the pump's wait with an ordered
//! outcome.

use crate::config_ext::EngineSettings;
use crate::engine::{persist_snapshot, GuildState};
use crate::events::EngineEvent;
use crate::voice::{PlayOutcome, TransportErrorKind, VoiceSessionManager};
use gksource::{ProviderRegistry, SourceError};
use gkqueue::{QueueEntry, SnapshotStore};
use gktrack::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) enum PumpCommand {
    /// New work may be available (enqueue, resume, re-attach).
    Wake,
    /// Abort the in-flight track and move on.
    Skip,
    /// The queue was emptied by the facade; abort the in-flight track.
    Stop,
    /// Terminate the pump.
    Shutdown,
}

pub(crate) struct PumpHandle {
    pub tx: mpsc::Sender<PumpCommand>,
    pub join: JoinHandle<()>,
}

pub(crate) struct PumpContext {
    pub guild_id: GuildId,
    pub state: Arc<GuildState>,
    pub registry: Arc<ProviderRegistry>,
    pub store: SnapshotStore,
    pub sessions: Arc<VoiceSessionManager>,
    pub events: broadcast::Sender<EngineEvent>,
    pub settings: EngineSettings,
    pub cancel: CancellationToken,
    /// Set when this pump was spawned over a snapshot-restored queue whose
    /// `current` entry should stream (from the start) instead of being
    /// discarded by the first `advance`.
    pub resume_restored_current: bool,
}

enum TrackEnd {
    Continue,
    Shutdown,
}

enum Interrupt {
    None,
    AbortTrack,
    Shutdown,
}

pub(crate) async fn run(ctx: PumpContext, mut rx: mpsc::Receiver<PumpCommand>) {
    let guild_id = ctx.guild_id.clone();
    debug!(guild = %guild_id, "Playback pump started");
    let mut resume_current = ctx.resume_restored_current;

    'main: loop {
        // host-signalled suspension: hold everything until a wake-up
        loop {
            let suspended = ctx.state.sync.lock().await.queue.paused_suspended();
            if !suspended {
                break;
            }
            match rx.recv().await {
                Some(PumpCommand::Shutdown) | None => break 'main,
                Some(_) => {}
            }
        }

        // Pick the next track. Finalizing the previous entry and starting
        // the next happen in one critical section, so the tracker is never
        // observably out of step with the queue.
        let (next, snapshot, revision) = {
            let mut st = ctx.state.sync.lock().await;
            if resume_current && st.queue.current().is_some() {
                resume_current = false;
                (
                    st.queue.current().cloned(),
                    st.queue.snapshot(),
                    st.queue.revision(),
                )
            } else {
                resume_current = false;
                let prev = st.queue.current().cloned();
                let next = st.queue.advance();
                if let Some(prev) = &prev {
                    st.tracker.on_finished(prev);
                }
                if let Some(next) = &next {
                    st.tracker.on_start_play(next);
                }
                (next, st.queue.snapshot(), st.queue.revision())
            }
        };
        persist_snapshot(&ctx.state, &ctx.store, snapshot, revision).await;

        let Some(entry) = next else {
            // drained: wait for new work, detach after the idle timeout
            let idle = Duration::from_secs(ctx.settings.idle_detach_seconds.max(1));
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(PumpCommand::Shutdown)) | Ok(None) => break 'main,
                Ok(Some(_)) => continue 'main,
                Err(_) => {
                    info!(guild = %guild_id, "Queue idle, detaching voice session");
                    ctx.sessions.detach(&guild_id).await;
                    let _ = ctx.events.send(EngineEvent::PumpIdleDetached {
                        guild_id: guild_id.clone(),
                    });
                    break 'main;
                }
            }
        };

        let end = play_track(&ctx, &mut rx, &entry).await;
        let _ = ctx.events.send(EngineEvent::TrackFinished {
            guild_id: guild_id.clone(),
            entry,
        });
        if matches!(end, TrackEnd::Shutdown) {
            break 'main;
        }
    }

    debug!(guild = %guild_id, "Playback pump exited");
}

/// Streams one entry to its end, with a single re-resolve when the host
/// reports the stream URL expired.
async fn play_track(
    ctx: &PumpContext,
    rx: &mut mpsc::Receiver<PumpCommand>,
    entry: &QueueEntry,
) -> TrackEnd {
    let guild_id = &ctx.guild_id;
    let mut attempt = 0u8;

    loop {
        attempt += 1;

        match drain_commands(rx) {
            Interrupt::Shutdown => return TrackEnd::Shutdown,
            Interrupt::AbortTrack => return TrackEnd::Continue,
            Interrupt::None => {}
        }

        // fresh playable URL, fetched outside the guild lock
        let playable = match ctx
            .registry
            .resolve_playable(&entry.descriptor, &ctx.cancel)
            .await
        {
            Ok(url) => url,
            Err(SourceError::Cancelled) => return TrackEnd::Shutdown,
            Err(err) => {
                warn!(
                    guild = %guild_id,
                    title = entry.title(),
                    error = %err,
                    "Failed to resolve a playable URL, dropping track"
                );
                return TrackEnd::Continue;
            }
        };

        // the requester must still be on the voice channel; a restored
        // requester who never re-appeared counts as absent
        if attempt == 1
            && !ctx
                .sessions
                .is_user_reachable(guild_id, &entry.requester_id)
                .await
        {
            info!(
                guild = %guild_id,
                requester = %entry.requester_id,
                title = entry.title(),
                "Requester not reachable, skipping track"
            );
            let _ = ctx.events.send(EngineEvent::RequesterAbsentSkip {
                guild_id: guild_id.clone(),
                entry: entry.clone(),
            });
            return TrackEnd::Continue;
        }

        let handle = match ctx.sessions.play(guild_id, &playable).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(guild = %guild_id, error = %err, "Transport refused to start the stream");
                return TrackEnd::Continue;
            }
        };

        if attempt == 1 {
            let _ = ctx.events.send(EngineEvent::TrackStarted {
                guild_id: guild_id.clone(),
                entry: entry.clone(),
            });
            notify_up_next(ctx).await;
        }

        // wait for the stream to end; commands act through the transport,
        // so they stay ordered with the completion signal
        let mut wait = std::pin::pin!(handle.wait());
        let mut shutdown_requested = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut wait => break outcome,
                cmd = rx.recv() => match cmd {
                    Some(PumpCommand::Skip) | Some(PumpCommand::Stop) => {
                        ctx.sessions.stop(guild_id).await;
                    }
                    Some(PumpCommand::Shutdown) | None => {
                        shutdown_requested = true;
                        ctx.sessions.stop(guild_id).await;
                    }
                    Some(PumpCommand::Wake) => {}
                },
            }
        };

        if shutdown_requested {
            return TrackEnd::Shutdown;
        }

        match outcome {
            PlayOutcome::Finished | PlayOutcome::Stopped => return TrackEnd::Continue,
            PlayOutcome::TransportError(TransportErrorKind::Expired) => {
                if attempt == 1 {
                    info!(
                        guild = %guild_id,
                        title = entry.title(),
                        "Stream URL expired mid-play, resolving a fresh one"
                    );
                    continue;
                }
                warn!(
                    guild = %guild_id,
                    title = entry.title(),
                    "Stream URL expired twice, giving up on this track"
                );
                return TrackEnd::Continue;
            }
            PlayOutcome::TransportError(TransportErrorKind::Disconnected) => {
                info!(guild = %guild_id, "Host closed the voice session, suspending playback");
                ctx.state.sync.lock().await.queue.set_paused_suspended(true);
                return TrackEnd::Continue;
            }
            PlayOutcome::TransportError(TransportErrorKind::Other(reason)) => {
                warn!(
                    guild = %guild_id,
                    title = entry.title(),
                    reason,
                    "Transport error, moving on to the next track"
                );
                return TrackEnd::Continue;
            }
        }
    }
}

/// Announces the upcoming track when its requester is currently absent, so
/// surfaces can ping them before their turn.
async fn notify_up_next(ctx: &PumpContext) {
    if !ctx.settings.notify_absent_users {
        return;
    }
    let next = ctx.state.sync.lock().await.queue.peek_next().cloned();
    let Some(next) = next else { return };
    if !ctx
        .sessions
        .is_user_reachable(&ctx.guild_id, &next.requester_id)
        .await
    {
        let _ = ctx.events.send(EngineEvent::UpNext {
            guild_id: ctx.guild_id.clone(),
            entry: next,
        });
    }
}

/// Consumes every queued command without blocking. Used between pump steps
/// so a skip or stop issued during the resolve phase is not lost.
fn drain_commands(rx: &mut mpsc::Receiver<PumpCommand>) -> Interrupt {
    let mut interrupt = Interrupt::None;
    loop {
        match rx.try_recv() {
            Ok(PumpCommand::Shutdown) => return Interrupt::Shutdown,
            Ok(PumpCommand::Skip) | Ok(PumpCommand::Stop) => {
                interrupt = Interrupt::AbortTrack;
            }
            Ok(PumpCommand::Wake) => {}
            Err(mpsc::error::TryRecvError::Empty) => return interrupt,
            Err(mpsc::error::TryRecvError::Disconnected) => return Interrupt::Shutdown,
        }
    }
}

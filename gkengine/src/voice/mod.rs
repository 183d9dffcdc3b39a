//! Voice transport abstraction and per-guild session bookkeeping.
//!
//! The engine never moves audio bytes itself. A [`VoiceTransport`] is the
//! chat platform's audio stack seen through the five operations the pump
//! needs: attach, detach, play, stop, and requester reachability. The
//! [`VoiceSessionManager`] wraps a transport with channel bookkeeping so
//! re-attach after a host disconnect can reuse the last channel.

mod loopback;

pub use loopback::LoopbackTransport;

use async_trait::async_trait;
use gktrack::{GuildId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("no voice session attached for guild {0}")]
    NotAttached(GuildId),

    #[error("failed to attach voice session: {0}")]
    AttachFailed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Why an active stream ended abnormally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The host rejected the stream URL ("expired" / auth failure). The
    /// pump re-resolves once before giving up on the track.
    Expired,
    /// The host tore the voice session down (server-side disconnect).
    Disconnected,
    Other(String),
}

/// Terminal state of one `play` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The stream ran to its natural end.
    Finished,
    /// `stop` was called on the transport.
    Stopped,
    TransportError(TransportErrorKind),
}

/// Completion side of a playback: the transport resolves it exactly once.
pub struct PlaySignal {
    tx: oneshot::Sender<PlayOutcome>,
}

impl PlaySignal {
    pub fn complete(self, outcome: PlayOutcome) {
        // the pump may already have gone away during shutdown
        let _ = self.tx.send(outcome);
    }
}

/// Waiting side of a playback, held by the pump.
pub struct PlayHandle {
    rx: oneshot::Receiver<PlayOutcome>,
}

impl PlayHandle {
    pub fn channel() -> (PlayHandle, PlaySignal) {
        let (tx, rx) = oneshot::channel();
        (PlayHandle { rx }, PlaySignal { tx })
    }

    /// Resolves when the stream ends. A transport that dropped its signal
    /// counts as stopped.
    pub async fn wait(self) -> PlayOutcome {
        self.rx.await.unwrap_or(PlayOutcome::Stopped)
    }
}

/// The chat platform's audio stack, process-wide and internally concurrent.
///
/// `detach` and `stop` are idempotent. `is_user_reachable` answers whether
/// a requester is present on the guild's voice channel right now — restored
/// requesters who never re-appeared are simply unreachable.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn attach(&self, guild_id: &GuildId, channel: &str) -> Result<(), VoiceError>;

    async fn detach(&self, guild_id: &GuildId);

    async fn play(&self, guild_id: &GuildId, url: &str) -> Result<PlayHandle, VoiceError>;

    async fn stop(&self, guild_id: &GuildId);

    async fn pause(&self, guild_id: &GuildId) -> bool;

    async fn resume(&self, guild_id: &GuildId) -> bool;

    async fn is_attached(&self, guild_id: &GuildId) -> bool;

    async fn is_user_reachable(&self, guild_id: &GuildId, user: &UserId) -> bool;
}

/// Transport wrapper with per-guild channel bookkeeping. Owns no queue
/// state whatsoever.
pub struct VoiceSessionManager {
    transport: Arc<dyn VoiceTransport>,
    channels: RwLock<HashMap<GuildId, String>>,
}

impl VoiceSessionManager {
    pub fn new(transport: Arc<dyn VoiceTransport>) -> Self {
        Self {
            transport,
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn attach(&self, guild_id: &GuildId, channel: &str) -> Result<(), VoiceError> {
        self.transport.attach(guild_id, channel).await?;
        self.channels
            .write()
            .await
            .insert(guild_id.clone(), channel.to_string());
        debug!(guild = %guild_id, channel, "Voice session attached");
        Ok(())
    }

    pub async fn detach(&self, guild_id: &GuildId) {
        self.transport.detach(guild_id).await;
        self.channels.write().await.remove(guild_id);
        debug!(guild = %guild_id, "Voice session detached");
    }

    pub async fn detach_all(&self) {
        let guilds: Vec<GuildId> = self.channels.read().await.keys().cloned().collect();
        for guild_id in guilds {
            self.detach(&guild_id).await;
        }
    }

    pub async fn play(&self, guild_id: &GuildId, url: &str) -> Result<PlayHandle, VoiceError> {
        self.transport.play(guild_id, url).await
    }

    pub async fn stop(&self, guild_id: &GuildId) {
        self.transport.stop(guild_id).await;
    }

    pub async fn pause(&self, guild_id: &GuildId) -> bool {
        self.transport.pause(guild_id).await
    }

    pub async fn resume(&self, guild_id: &GuildId) -> bool {
        self.transport.resume(guild_id).await
    }

    pub async fn is_attached(&self, guild_id: &GuildId) -> bool {
        self.transport.is_attached(guild_id).await
    }

    pub async fn is_user_reachable(&self, guild_id: &GuildId, user: &UserId) -> bool {
        self.transport.is_user_reachable(guild_id, user).await
    }

    /// Channel recorded at the last successful attach, for re-attach after
    /// a host-signalled disconnect.
    pub async fn last_channel(&self, guild_id: &GuildId) -> Option<String> {
        self.channels.read().await.get(guild_id).cloned()
    }

    /// Attempts to re-establish a session on the last known channel.
    pub async fn reattach(&self, guild_id: &GuildId) -> Result<(), VoiceError> {
        match self.last_channel(guild_id).await {
            Some(channel) => self.attach(guild_id, &channel).await,
            None => {
                warn!(guild = %guild_id, "No previous channel to re-attach to");
                Err(VoiceError::NotAttached(guild_id.clone()))
            }
        }
    }
}

//! # gkengine
//!
//! The orchestration layer of GrooveKeeper: one playback pump per guild,
//! the voice session manager, and the public engine facade.
//!
//! ## Architecture
//!
//! The [`Engine`] owns per-guild state (queue + fairness tracker behind one
//! async mutex) and a map of running pumps. A pump is a dedicated tokio
//! task driven by a command mailbox; it is spawned lazily when a guild's
//! first track is admitted and winds down after the queue drains and the
//! idle timeout passes. Skip, stop, and shutdown are mailbox messages, not
//! shared flags, so they are ordered with respect to the pump's own state
//! transitions.
//!
//! The audio byte transport is abstracted behind [`VoiceTransport`]; the
//! engine never touches audio data itself. A scriptable
//! [`voice::LoopbackTransport`] backs the integration tests.

mod config_ext;
mod engine;
mod error;
mod events;
mod pump;
pub mod voice;

pub use config_ext::{EngineConfigExt, EngineSettings};
pub use engine::{Engine, EngineBuilder, RejectKind, SubmitOutcome};
pub use error::{EngineError, Result};
pub use events::EngineEvent;
pub use voice::{
    PlayHandle, PlayOutcome, PlaySignal, TransportErrorKind, VoiceError, VoiceSessionManager,
    VoiceTransport,
};

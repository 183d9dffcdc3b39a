use crate::voice::VoiceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("an engine needs a voice transport; call EngineBuilder::transport")]
    MissingTransport,

    #[error("nothing is playing in this guild")]
    NotPlaying,

    #[error("no voice session attached for this guild")]
    NotAttached,

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Queue(#[from] gkqueue::QueueError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("position {0} is out of range")]
    OutOfRange(usize),

    #[error("queue is full ({0} entries)")]
    QueueFull(usize),

    #[error("snapshot schema {found} is not the supported version {expected}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

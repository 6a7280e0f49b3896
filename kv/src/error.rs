use std::io;

/// Errors surfaced by the storage engine, commit log, and checkpoint store.
///
/// A missing key is always a local, recoverable condition; corruption and
/// checkpoint/fsync failures are loud but never fatal to the running
/// process.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("key not found")]
    MissingKey,

    #[error("malformed command: {0}")]
    ProtocolMalformed(String),

    #[error("commit log corrupt at offset {offset}: {reason}")]
    LogCorrupt { offset: u64, reason: String },

    #[error("checkpoint failed: {0}")]
    CheckpointFailed(String),

    #[error("fsync failed: {0}")]
    FsyncFailed(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("checkpoint database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type CResult<T> = Result<T, Error>;

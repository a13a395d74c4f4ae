//! # error
//!
//! why: give every layer of the log one error vocabulary
//! relations: returned by raft-log storage, sequences, snapshots and the log facade
//! what: LogError taxonomy and the crate-wide Result alias

use thiserror::Error;

/// Errors raised by the replicated log
///
/// `Io`, `Serialization` and `Corrupted` mean durable state can no longer be
/// trusted and the node should stop. The remaining variants report caller
/// mistakes or stale protocol input.
#[derive(Error, Debug)]
pub enum LogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupted log data: {0}")]
    Corrupted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("entry {0} has been compacted into the snapshot")]
    EntryInSnapshot(u64),

    #[error("entry sequence is empty")]
    EmptySequence,

    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl LogError {
    /// True for failures after which the node must not continue
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LogError::Io(_) | LogError::Serialization(_) | LogError::Corrupted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_fatal() {
        let err: LogError = std::io::Error::other("disk gone").into();
        assert!(err.is_fatal());
        assert!(!LogError::EmptySequence.is_fatal());
        assert!(!LogError::EntryInSnapshot(3).is_fatal());
    }

    #[test]
    fn messages_name_the_offending_value() {
        assert_eq!(
            LogError::EntryInSnapshot(7).to_string(),
            "entry 7 has been compacted into the snapshot"
        );
    }
}

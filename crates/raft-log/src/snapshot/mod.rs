//! # snapshot
//!
//! why: compact applied history into a state-machine dump plus raft metadata
//! relations: produced by the state machine or the leader, owned by the log facade
//! what: Snapshot and SnapshotBuilder traits, SnapshotChunk, EmptySnapshot, chunk validation

pub mod file;
pub mod memory;

pub use file::{FileSnapshot, FileSnapshotBuilder, FileSnapshotWriter, StagedSnapshot};
pub use memory::{MemorySnapshot, MemorySnapshotBuilder};

use raft_core::{InstallSnapshotRpc, LogError, Membership, Result};
use std::io::{self, Read};

/// A piece of snapshot data read for an InstallSnapshot rpc
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChunk {
    pub data: Vec<u8>,
    /// True when the chunk reaches the end of the data
    pub last_chunk: bool,
}

/// Immutable point-in-time dump of the state machine
pub trait Snapshot {
    fn last_included_index(&self) -> u64;

    fn last_included_term(&self) -> u64;

    /// Membership effective at `last_included_index`
    fn last_config(&self) -> &Membership;

    /// Length of the state machine data in bytes
    fn data_size(&self) -> u64;

    /// Read up to `length` bytes of data starting at `offset`
    fn read_data(&mut self, offset: u64, length: usize) -> Result<SnapshotChunk>;

    /// Stream the whole state machine data from the start
    fn data_reader(&mut self) -> Result<Box<dyn Read + '_>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Accumulates InstallSnapshot chunks into a snapshot
pub trait SnapshotBuilder {
    type Output: Snapshot;

    /// Accept the next chunk of the same snapshot stream
    fn append(&mut self, rpc: &InstallSnapshotRpc) -> Result<()>;

    /// Materialize the snapshot once the done chunk was appended
    fn build(self) -> Result<Self::Output>;
}

/// Placeholder snapshot of a log that was never compacted
#[derive(Debug, Clone, Default)]
pub struct EmptySnapshot {
    last_config: Membership,
}

impl EmptySnapshot {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Snapshot for EmptySnapshot {
    fn last_included_index(&self) -> u64 {
        0
    }

    fn last_included_term(&self) -> u64 {
        0
    }

    fn last_config(&self) -> &Membership {
        &self.last_config
    }

    fn data_size(&self) -> u64 {
        0
    }

    fn read_data(&mut self, offset: u64, _length: usize) -> Result<SnapshotChunk> {
        if offset != 0 {
            return Err(LogError::InvalidArgument(format!(
                "offset {} beyond empty snapshot",
                offset
            )));
        }
        Ok(SnapshotChunk {
            data: Vec::new(),
            last_chunk: true,
        })
    }

    fn data_reader(&mut self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(io::empty()))
    }
}

/// Stream position and identity shared by every builder
///
/// A builder only accepts chunks continuing at the expected byte offset of
/// the snapshot it was started for.
#[derive(Debug, Clone)]
pub struct ChunkTracker {
    last_included_index: u64,
    last_included_term: u64,
    last_config: Membership,
    offset: u64,
}

impl ChunkTracker {
    /// Start tracking from the first chunk of a stream
    pub fn start(first: &InstallSnapshotRpc) -> Result<Self> {
        if first.offset != 0 {
            return Err(LogError::InvalidArgument(format!(
                "first snapshot chunk must start at offset 0, but was {}",
                first.offset
            )));
        }
        Ok(Self {
            last_included_index: first.last_index,
            last_included_term: first.last_term,
            last_config: first.last_config.clone(),
            offset: first.data.len() as u64,
        })
    }

    /// Check that `rpc` continues this stream and advance past its data
    pub fn accept(&mut self, rpc: &InstallSnapshotRpc) -> Result<()> {
        if rpc.offset != self.offset {
            return Err(LogError::InvalidArgument(format!(
                "unexpected offset, expected {}, but was {}",
                self.offset, rpc.offset
            )));
        }
        if rpc.last_index != self.last_included_index || rpc.last_term != self.last_included_term {
            return Err(LogError::InvalidArgument(format!(
                "unexpected last included index/term {}/{}, expected {}/{}",
                rpc.last_index, rpc.last_term, self.last_included_index, self.last_included_term
            )));
        }
        self.offset += rpc.data.len() as u64;
        Ok(())
    }

    pub fn last_included_index(&self) -> u64 {
        self.last_included_index
    }

    pub fn last_included_term(&self) -> u64 {
        self.last_included_term
    }

    pub fn last_config(&self) -> &Membership {
        &self.last_config
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Shared chunk arithmetic over an in-memory or on-disk data region
pub(crate) fn chunk_bounds(offset: u64, length: usize, data_size: u64) -> Result<(u64, bool)> {
    if offset > data_size {
        return Err(LogError::InvalidArgument(format!(
            "offset {} beyond snapshot data of {} bytes",
            offset, data_size
        )));
    }
    let read = (data_size - offset).min(length as u64);
    Ok((read, offset + read >= data_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::NodeId;

    pub(crate) fn chunk(offset: u64, data: &[u8], done: bool) -> InstallSnapshotRpc {
        InstallSnapshotRpc {
            term: 1,
            leader_id: NodeId::new("A"),
            last_index: 5,
            last_term: 2,
            last_config: Membership::new(),
            offset,
            data: data.to_vec(),
            done,
        }
    }

    #[test]
    fn empty_snapshot_reads_single_last_chunk() {
        let mut snapshot = EmptySnapshot::new();
        let chunk = snapshot.read_data(0, 10).unwrap();
        assert!(chunk.data.is_empty());
        assert!(chunk.last_chunk);
        assert!(snapshot.read_data(1, 10).is_err());
    }

    #[test]
    fn tracker_accepts_contiguous_chunks() {
        let mut tracker = ChunkTracker::start(&chunk(0, b"abc", false)).unwrap();
        assert_eq!(tracker.offset(), 3);
        tracker.accept(&chunk(3, b"de", true)).unwrap();
        assert_eq!(tracker.offset(), 5);
    }

    #[test]
    fn tracker_rejects_offset_gap() {
        let mut tracker = ChunkTracker::start(&chunk(0, b"abc", false)).unwrap();
        assert!(matches!(
            tracker.accept(&chunk(4, b"x", false)),
            Err(LogError::InvalidArgument(_))
        ));
    }

    #[test]
    fn tracker_rejects_other_snapshot() {
        let mut tracker = ChunkTracker::start(&chunk(0, b"abc", false)).unwrap();
        let mut stale = chunk(3, b"x", false);
        stale.last_index = 4;
        assert!(tracker.accept(&stale).is_err());
        let mut other_term = chunk(3, b"x", false);
        other_term.last_term = 3;
        assert!(tracker.accept(&other_term).is_err());
    }

    #[test]
    fn tracker_requires_first_chunk_at_zero() {
        assert!(ChunkTracker::start(&chunk(2, b"abc", false)).is_err());
    }

    #[test]
    fn chunk_bounds_flags_last_chunk() {
        assert_eq!(chunk_bounds(0, 4, 10).unwrap(), (4, false));
        assert_eq!(chunk_bounds(8, 4, 10).unwrap(), (2, true));
        assert_eq!(chunk_bounds(10, 4, 10).unwrap(), (0, true));
        assert!(chunk_bounds(11, 4, 10).is_err());
    }
}

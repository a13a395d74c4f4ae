//! # memory
//!
//! why: hold snapshots in memory for the memory-backed log
//! relations: implements snapshot::Snapshot and SnapshotBuilder, used by log/memory.rs
//! what: MemorySnapshot, MemorySnapshotBuilder

use super::{chunk_bounds, ChunkTracker, Snapshot, SnapshotBuilder, SnapshotChunk};
use raft_core::{InstallSnapshotRpc, Membership, Result};
use std::io::Read;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySnapshot {
    last_included_index: u64,
    last_included_term: u64,
    last_config: Membership,
    data: Vec<u8>,
}

impl MemorySnapshot {
    pub fn new(
        last_included_index: u64,
        last_included_term: u64,
        last_config: Membership,
        data: Vec<u8>,
    ) -> Self {
        Self {
            last_included_index,
            last_included_term,
            last_config,
            data,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Snapshot for MemorySnapshot {
    fn last_included_index(&self) -> u64 {
        self.last_included_index
    }

    fn last_included_term(&self) -> u64 {
        self.last_included_term
    }

    fn last_config(&self) -> &Membership {
        &self.last_config
    }

    fn data_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_data(&mut self, offset: u64, length: usize) -> Result<SnapshotChunk> {
        let (read, last_chunk) = chunk_bounds(offset, length, self.data_size())?;
        let start = offset as usize;
        Ok(SnapshotChunk {
            data: self.data[start..start + read as usize].to_vec(),
            last_chunk,
        })
    }

    fn data_reader(&mut self) -> Result<Box<dyn Read + '_>> {
        Ok(Box::new(self.data.as_slice()))
    }
}

/// Collects snapshot chunks into a byte buffer
#[derive(Debug)]
pub struct MemorySnapshotBuilder {
    tracker: ChunkTracker,
    data: Vec<u8>,
}

impl MemorySnapshotBuilder {
    pub fn new(first: &InstallSnapshotRpc) -> Result<Self> {
        Ok(Self {
            tracker: ChunkTracker::start(first)?,
            data: first.data.clone(),
        })
    }
}

impl SnapshotBuilder for MemorySnapshotBuilder {
    type Output = MemorySnapshot;

    fn append(&mut self, rpc: &InstallSnapshotRpc) -> Result<()> {
        self.tracker.accept(rpc)?;
        self.data.extend_from_slice(&rpc.data);
        Ok(())
    }

    fn build(self) -> Result<MemorySnapshot> {
        Ok(MemorySnapshot::new(
            self.tracker.last_included_index(),
            self.tracker.last_included_term(),
            self.tracker.last_config().clone(),
            self.data,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::tests::chunk;

    #[test]
    fn read_data_in_chunks() {
        let mut snapshot = MemorySnapshot::new(3, 1, Membership::new(), b"abcdefg".to_vec());
        let first = snapshot.read_data(0, 4).unwrap();
        assert_eq!(first.data, b"abcd".to_vec());
        assert!(!first.last_chunk);
        let second = snapshot.read_data(4, 4).unwrap();
        assert_eq!(second.data, b"efg".to_vec());
        assert!(second.last_chunk);
        assert!(snapshot.read_data(8, 4).is_err());
    }

    #[test]
    fn data_reader_streams_everything() {
        let mut snapshot = MemorySnapshot::new(3, 1, Membership::new(), b"state".to_vec());
        let mut buf = Vec::new();
        snapshot.data_reader().unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"state".to_vec());
    }

    #[test]
    fn builder_concatenates_chunks() {
        let mut builder = MemorySnapshotBuilder::new(&chunk(0, b"abc", false)).unwrap();
        builder.append(&chunk(3, b"def", true)).unwrap();
        let snapshot = builder.build().unwrap();
        assert_eq!(snapshot.last_included_index(), 5);
        assert_eq!(snapshot.last_included_term(), 2);
        assert_eq!(snapshot.data(), b"abcdef");
    }

    #[test]
    fn builder_rejects_duplicate_chunk() {
        let mut builder = MemorySnapshotBuilder::new(&chunk(0, b"abc", false)).unwrap();
        assert!(builder.append(&chunk(0, b"abc", false)).is_err());
    }
}

//! # memory
//!
//! why: run the full log algorithms without touching disk
//! relations: LogStorage over sequence/memory.rs and snapshot/memory.rs
//! what: MemoryStorage, MemoryLog

use super::{Log, LogStorage};
use crate::event::NoopListener;
use crate::group_config::GroupConfigEntryList;
use crate::sequence::{EntrySequence, MemoryEntrySequence};
use crate::snapshot::{EmptySnapshot, MemorySnapshot, MemorySnapshotBuilder, Snapshot};
use crate::state_machine::{EmptyStateMachine, StateMachine};
use raft_core::{Entry, EntryMeta, InstallSnapshotRpc, LogError, Membership, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStorage;

impl LogStorage for MemoryStorage {
    type Sequence = MemoryEntrySequence;
    type Staged = MemorySnapshot;
    type Builder = MemorySnapshotBuilder;

    fn snapshot_builder(&mut self, first_chunk: &InstallSnapshotRpc) -> Result<Self::Builder> {
        MemorySnapshotBuilder::new(first_chunk)
    }

    fn write_snapshot(
        &mut self,
        last_entry: EntryMeta,
        last_config: &Membership,
        state_machine: &mut dyn StateMachine,
    ) -> Result<MemorySnapshot> {
        let mut data = Vec::new();
        state_machine.generate_snapshot(&mut data)?;
        Ok(MemorySnapshot::new(
            last_entry.index,
            last_entry.term,
            last_config.clone(),
            data,
        ))
    }

    fn replace_snapshot(
        &mut self,
        current: &mut Box<dyn Snapshot>,
        sequence: &mut MemoryEntrySequence,
        staged: MemorySnapshot,
        remaining: Vec<Entry>,
        commit_index: u64,
    ) -> Result<()> {
        let mut next = MemoryEntrySequence::new(staged.last_included_index() + 1);
        next.append_all(remaining)?;
        next.commit(commit_index)?;
        current.close()?;
        *current = Box::new(staged);
        *sequence = next;
        Ok(())
    }
}

/// Log kept entirely in memory
pub type MemoryLog = Log<MemoryStorage>;

impl MemoryLog {
    pub fn new() -> Self {
        Self::from_parts(Box::new(EmptySnapshot::new()), MemoryEntrySequence::new(1))
    }

    /// Start from an existing snapshot and the entries following it
    pub fn with_snapshot(snapshot: MemorySnapshot, sequence: MemoryEntrySequence) -> Result<Self> {
        let expected = snapshot.last_included_index() + 1;
        if sequence.log_index_offset() != expected.max(1) {
            return Err(LogError::InvalidArgument(format!(
                "sequence must start at {}, but starts at {}",
                expected,
                sequence.log_index_offset()
            )));
        }
        Log::assemble(MemoryStorage, Box::new(snapshot), sequence)
    }

    fn from_parts(snapshot: Box<dyn Snapshot>, sequence: MemoryEntrySequence) -> Self {
        Self {
            storage: MemoryStorage,
            snapshot,
            sequence,
            snapshot_builder: None,
            group_configs: GroupConfigEntryList::new(),
            state_machine: Box::new(EmptyStateMachine::new()),
            listener: Box::new(NoopListener),
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

//! # log
//!
//! why: implement raft log matching, commit and compaction over pluggable storage
//! relations: composes sequence/, snapshot/, state_machine.rs and event.rs; backed by memory.rs or file.rs
//! what: LogStorage trait, Log facade, InstallSnapshotState, the apply pipeline

pub mod file;
pub mod memory;

pub use file::{FileLog, FileStorage};
pub use memory::{MemoryLog, MemoryStorage};

use crate::event::{LogListener, NoopListener};
use crate::group_config::GroupConfigEntryList;
use crate::sequence::EntrySequence;
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::state_machine::{EmptyStateMachine, StateMachine, StateMachineContext};
use raft_core::{
    AppendEntriesRpc, Entry, EntryKind, EntryMeta, EntryPayload, InstallSnapshotRpc, LogError,
    Membership, NodeEndpoint, NodeId, Result,
};
use tracing::{debug, info, warn};

/// Where a log keeps its entries and snapshots
pub trait LogStorage {
    type Sequence: EntrySequence;
    /// A finished snapshot not yet swapped in
    type Staged: Snapshot + 'static;
    type Builder: SnapshotBuilder<Output = Self::Staged>;

    /// Start collecting a snapshot sent by the leader
    fn snapshot_builder(&mut self, first_chunk: &InstallSnapshotRpc) -> Result<Self::Builder>;

    /// Serialize the state machine into a snapshot ending at `last_entry`
    fn write_snapshot(
        &mut self,
        last_entry: EntryMeta,
        last_config: &Membership,
        state_machine: &mut dyn StateMachine,
    ) -> Result<Self::Staged>;

    /// Swap in `staged` with a sequence holding `remaining` committed through `commit_index`
    ///
    /// The old snapshot and sequence are released only once their
    /// replacements exist.
    fn replace_snapshot(
        &mut self,
        current: &mut Box<dyn Snapshot>,
        sequence: &mut Self::Sequence,
        staged: Self::Staged,
        remaining: Vec<Entry>,
        commit_index: u64,
    ) -> Result<()>;
}

/// Outcome of feeding one InstallSnapshot chunk to the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSnapshotState {
    /// The snapshot is not newer than the current one
    Rejected,
    /// More chunks are expected
    Installing,
    /// The snapshot replaced the log prefix; carries its membership
    Installed(Membership),
}

/// Forwards state machine snapshot requests to the listener
struct ListenerContext<'a> {
    listener: &'a mut dyn LogListener,
}

impl StateMachineContext for ListenerContext<'_> {
    fn generate_snapshot(&mut self, last_included_index: u64) {
        self.listener.on_snapshot_generation_requested(last_included_index);
    }
}

/// Feed one committed entry to the state machine
fn apply_entry(
    state_machine: &mut dyn StateMachine,
    context: &mut dyn StateMachineContext,
    entry: &Entry,
    first_log_index: u64,
) -> Result<()> {
    match &entry.payload {
        EntryPayload::General(command) => {
            state_machine.apply_log(context, entry.index, command, first_log_index)
        }
        _ => state_machine.advance_last_applied(entry.index),
    }
}

/// Replicated log: snapshot + entry sequence + state machine
///
/// All mutating calls must come from one thread; nothing here locks.
pub struct Log<S: LogStorage> {
    storage: S,
    snapshot: Box<dyn Snapshot>,
    sequence: S::Sequence,
    snapshot_builder: Option<S::Builder>,
    group_configs: GroupConfigEntryList,
    state_machine: Box<dyn StateMachine>,
    listener: Box<dyn LogListener>,
}

impl<S: LogStorage> Log<S> {
    pub(crate) fn assemble(
        storage: S,
        snapshot: Box<dyn Snapshot>,
        mut sequence: S::Sequence,
    ) -> Result<Self> {
        let group_configs = sequence.build_group_config_entry_list()?;
        Ok(Self {
            storage,
            snapshot,
            sequence,
            snapshot_builder: None,
            group_configs,
            state_machine: Box::new(EmptyStateMachine::new()),
            listener: Box::new(NoopListener),
        })
    }

    pub fn set_state_machine(&mut self, state_machine: impl StateMachine + 'static) {
        self.state_machine = Box::new(state_machine);
    }

    pub fn set_listener(&mut self, listener: impl LogListener + 'static) {
        self.listener = Box::new(listener);
    }

    pub fn state_machine(&self) -> &dyn StateMachine {
        self.state_machine.as_ref()
    }

    pub fn snapshot(&self) -> &dyn Snapshot {
        self.snapshot.as_ref()
    }

    pub fn sequence(&self) -> &S::Sequence {
        &self.sequence
    }

    pub fn commit_index(&self) -> u64 {
        self.sequence.commit_index()
    }

    pub fn next_index(&self) -> u64 {
        self.sequence.next_log_index()
    }

    /// Last entry of the log, or the snapshot boundary when no entry is stored
    pub fn last_entry_meta(&self) -> Result<EntryMeta> {
        Ok(match self.sequence.last_entry_meta()? {
            Some(meta) => meta,
            None => EntryMeta::new(
                EntryKind::NoOp,
                self.snapshot.last_included_index(),
                self.snapshot.last_included_term(),
            ),
        })
    }

    /// Whether this log is more up to date than a candidate's last entry
    pub fn is_newer_than(&self, last_log_index: u64, last_log_term: u64) -> Result<bool> {
        let last = self.last_entry_meta()?;
        debug!(
            target: "raft::log",
            last_index = last.index,
            last_term = last.term,
            last_log_index,
            last_log_term,
            "comparing last entry with candidate"
        );
        Ok(last.term > last_log_term || (last.term == last_log_term && last.index > last_log_index))
    }

    /// Latest membership change that is not committed yet
    pub fn last_uncommitted_group_config_entry(&self) -> Option<&Entry> {
        let commit_index = self.sequence.commit_index();
        self.group_configs.last().filter(|e| e.index > commit_index)
    }

    // -- leader side --

    pub fn append_entry(&mut self, term: u64) -> Result<Entry> {
        let entry = Entry::no_op(self.sequence.next_log_index(), term);
        self.sequence.append(entry.clone())?;
        Ok(entry)
    }

    pub fn append_entry_with_command(&mut self, term: u64, command: Vec<u8>) -> Result<Entry> {
        let entry = Entry::general(self.sequence.next_log_index(), term, command);
        self.sequence.append(entry.clone())?;
        Ok(entry)
    }

    pub fn append_entry_for_add_node(
        &mut self,
        term: u64,
        node_endpoints: Membership,
        new_node_endpoint: NodeEndpoint,
    ) -> Result<Entry> {
        let entry = Entry::add_node(
            self.sequence.next_log_index(),
            term,
            node_endpoints,
            new_node_endpoint,
        );
        self.append_group_config(entry)
    }

    pub fn append_entry_for_remove_node(
        &mut self,
        term: u64,
        node_endpoints: Membership,
        node_to_remove: NodeId,
    ) -> Result<Entry> {
        let entry = Entry::remove_node(
            self.sequence.next_log_index(),
            term,
            node_endpoints,
            node_to_remove,
        );
        self.append_group_config(entry)
    }

    fn append_group_config(&mut self, entry: Entry) -> Result<Entry> {
        self.sequence.append(entry.clone())?;
        self.group_configs.add(entry.clone());
        Ok(entry)
    }

    /// Build the AppendEntries rpc for a follower expecting `next_index`
    ///
    /// `max_entries` of `None` attaches every remaining entry. Fails with
    /// `EntryInSnapshot` when the follower needs InstallSnapshot instead.
    pub fn create_append_entries_rpc(
        &mut self,
        term: u64,
        self_id: &NodeId,
        next_index: u64,
        max_entries: Option<usize>,
    ) -> Result<AppendEntriesRpc> {
        let next_log_index = self.sequence.next_log_index();
        if next_index > next_log_index {
            return Err(LogError::InvalidArgument(format!(
                "illegal next index {}",
                next_index
            )));
        }
        let last_included_index = self.snapshot.last_included_index();
        if next_index <= last_included_index {
            return Err(LogError::EntryInSnapshot(next_index));
        }

        let (prev_log_index, prev_log_term) = if next_index == last_included_index + 1 {
            (last_included_index, self.snapshot.last_included_term())
        } else {
            let prev = self.sequence.entry_meta(next_index - 1)?.ok_or_else(|| {
                LogError::IllegalState(format!("entry {} missing", next_index - 1))
            })?;
            (prev.index, prev.term)
        };

        let entries = if self.sequence.is_empty() {
            Vec::new()
        } else {
            let to_index = match max_entries {
                Some(max) => next_log_index.min(next_index.saturating_add(max as u64)),
                None => next_log_index,
            };
            self.sequence.sub_list(next_index, to_index)?
        };

        Ok(AppendEntriesRpc {
            term,
            leader_id: self_id.clone(),
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.sequence.commit_index(),
        })
    }

    /// Build the InstallSnapshot rpc carrying `length` bytes from `offset`
    pub fn create_install_snapshot_rpc(
        &mut self,
        term: u64,
        self_id: &NodeId,
        offset: u64,
        length: usize,
    ) -> Result<InstallSnapshotRpc> {
        let chunk = self.snapshot.read_data(offset, length)?;
        Ok(InstallSnapshotRpc {
            term,
            leader_id: self_id.clone(),
            last_index: self.snapshot.last_included_index(),
            last_term: self.snapshot.last_included_term(),
            last_config: if offset == 0 {
                self.snapshot.last_config().clone()
            } else {
                Membership::new()
            },
            offset,
            data: chunk.data,
            done: chunk.last_chunk,
        })
    }

    // -- follower side --

    /// Reconcile the log with entries sent by the leader
    ///
    /// Returns false when the entry before `leader_entries` does not match,
    /// the leader then retries from an earlier index.
    pub fn append_entries_from_leader(
        &mut self,
        prev_log_index: u64,
        prev_log_term: u64,
        leader_entries: Vec<Entry>,
    ) -> Result<bool> {
        if !self.previous_log_matches(prev_log_index, prev_log_term)? {
            debug!(
                target: "raft::log",
                prev_log_index,
                prev_log_term,
                "previous log does not match"
            );
            return Ok(false);
        }
        let Some(first) = leader_entries.first() else {
            return Ok(true);
        };
        if first.index != prev_log_index + 1 {
            return Err(LogError::InvalidArgument(format!(
                "first leader entry must be {}, but was {}",
                prev_log_index + 1,
                first.index
            )));
        }

        let Some(first_unmatched) = self.find_first_unmatched(&leader_entries)? else {
            return Ok(true);
        };
        self.remove_entries_after(first_unmatched - 1)?;
        for entry in leader_entries.into_iter().filter(|e| e.index >= first_unmatched) {
            self.append_entry_from_leader(entry)?;
        }
        Ok(true)
    }

    fn previous_log_matches(&self, prev_log_index: u64, prev_log_term: u64) -> Result<bool> {
        let last_included_index = self.snapshot.last_included_index();
        if prev_log_index < last_included_index {
            return Ok(false);
        }
        if prev_log_index == last_included_index {
            return Ok(prev_log_term == self.snapshot.last_included_term());
        }
        Ok(self
            .sequence
            .entry_meta(prev_log_index)?
            .is_some_and(|meta| meta.term == prev_log_term))
    }

    fn find_first_unmatched(&self, leader_entries: &[Entry]) -> Result<Option<u64>> {
        for entry in leader_entries {
            match self.sequence.entry_meta(entry.index)? {
                Some(meta) if meta.term == entry.term => continue,
                _ => return Ok(Some(entry.index)),
            }
        }
        Ok(None)
    }

    /// Truncate after `index`, rebuilding state machine state if applied entries go away
    fn remove_entries_after(&mut self, index: u64) -> Result<()> {
        if self.sequence.is_empty() || index >= self.sequence.last_log_index()? {
            return Ok(());
        }

        let last_applied = self.state_machine.last_applied();
        if index < last_applied {
            let to_index = (last_applied + 1).min(self.sequence.next_log_index());
            let removed_applied = self.sequence.sub_list(index + 1, to_index)?;
            if removed_applied.iter().any(Entry::is_applicable) {
                warn!(
                    target: "raft::log",
                    index,
                    last_applied,
                    "applied entries removed, reapplying from snapshot"
                );
                self.state_machine.apply_snapshot(self.snapshot.as_mut())?;
                let first_log_index = self.sequence.log_index_offset();
                if index >= first_log_index {
                    let replay = self.sequence.sub_list(first_log_index, index + 1)?;
                    let mut context = ListenerContext {
                        listener: self.listener.as_mut(),
                    };
                    for entry in &replay {
                        apply_entry(
                            self.state_machine.as_mut(),
                            &mut context,
                            entry,
                            first_log_index,
                        )?;
                    }
                }
            }
        }

        debug!(target: "raft::log", index, "removing entries after index");
        self.sequence.remove_after(index)?;
        if let Some(first_removed) = self.group_configs.remove_after(index) {
            self.listener.on_group_config_removed(&first_removed);
        }
        Ok(())
    }

    fn append_entry_from_leader(&mut self, entry: Entry) -> Result<()> {
        self.sequence.append(entry.clone())?;
        if entry.is_group_config() {
            self.listener.on_group_config_appended(&entry);
            self.group_configs.add(entry);
        }
        Ok(())
    }

    // -- commit and apply --

    /// Commit through `new_commit_index` if that entry belongs to `current_term`
    pub fn advance_commit_index(&mut self, new_commit_index: u64, current_term: u64) -> Result<()> {
        let commit_index = self.sequence.commit_index();
        if new_commit_index <= commit_index {
            return Ok(());
        }
        match self.sequence.entry_meta(new_commit_index)? {
            None => {
                debug!(target: "raft::log", new_commit_index, "entry of new commit index not found");
                return Ok(());
            }
            Some(meta) if meta.term != current_term => {
                debug!(
                    target: "raft::log",
                    new_commit_index,
                    entry_term = meta.term,
                    current_term,
                    "entry term differs from current term"
                );
                return Ok(());
            }
            Some(_) => {}
        }

        debug!(
            target: "raft::log",
            from = commit_index,
            to = new_commit_index,
            "advancing commit index"
        );
        self.sequence.commit(new_commit_index)?;
        for entry in self.group_configs.sub_list(commit_index + 1, new_commit_index + 1) {
            self.listener.on_group_config_committed(&entry);
        }
        self.apply_committed()
    }

    /// Catch the state machine up with the commit index
    pub fn apply_committed(&mut self) -> Result<()> {
        let commit_index = self.sequence.commit_index();
        let mut last_applied = self.state_machine.last_applied();
        let last_included_index = self.snapshot.last_included_index();
        if last_applied == 0 && last_included_index > 0 {
            self.state_machine.apply_snapshot(self.snapshot.as_mut())?;
            last_applied = last_included_index;
        }
        if last_applied >= commit_index || self.sequence.is_empty() {
            return Ok(());
        }

        let first_log_index = self.sequence.log_index_offset();
        let entries = self.sequence.sub_list(last_applied + 1, commit_index + 1)?;
        let mut context = ListenerContext {
            listener: self.listener.as_mut(),
        };
        for entry in &entries {
            apply_entry(
                self.state_machine.as_mut(),
                &mut context,
                entry,
                first_log_index,
            )?;
        }
        Ok(())
    }

    // -- compaction --

    /// Feed one InstallSnapshot chunk; installs the snapshot once the done chunk arrives
    pub fn install_snapshot(&mut self, rpc: &InstallSnapshotRpc) -> Result<InstallSnapshotState> {
        if rpc.last_index <= self.snapshot.last_included_index() {
            debug!(
                target: "raft::snapshot",
                last_index = rpc.last_index,
                last_included_index = self.snapshot.last_included_index(),
                "rejecting stale snapshot"
            );
            return Ok(InstallSnapshotState::Rejected);
        }

        if rpc.offset == 0 {
            self.snapshot_builder = Some(self.storage.snapshot_builder(rpc)?);
        } else {
            self.snapshot_builder
                .as_mut()
                .ok_or_else(|| {
                    LogError::InvalidArgument(format!(
                        "no snapshot in progress for chunk at offset {}",
                        rpc.offset
                    ))
                })?
                .append(rpc)?;
        }
        if !rpc.done {
            return Ok(InstallSnapshotState::Installing);
        }

        let builder = self
            .snapshot_builder
            .take()
            .ok_or_else(|| LogError::IllegalState("snapshot builder missing".into()))?;
        let staged = builder.build()?;
        let last_included_index = staged.last_included_index();
        let last_included_term = staged.last_included_term();
        let last_config = staged.last_config().clone();

        // keep the local suffix only if it continues the snapshot
        let remaining = match self.sequence.entry_meta(last_included_index)? {
            Some(meta) if meta.term == last_included_term => {
                self.sequence.sub_view(last_included_index + 1)?
            }
            _ => Vec::new(),
        };
        self.replace_snapshot(staged, remaining)?;
        self.state_machine.apply_snapshot(self.snapshot.as_mut())?;
        self.apply_committed()?;

        info!(
            target: "raft::snapshot",
            last_included_index,
            last_included_term,
            commit_index = self.sequence.commit_index(),
            "installed snapshot"
        );
        Ok(InstallSnapshotState::Installed(last_config))
    }

    /// Compact every entry up to `last_included_index` into a new snapshot
    ///
    /// When the state machine has already applied further, the snapshot covers
    /// everything it applied, since that is what its serialized state holds.
    pub fn generate_snapshot(
        &mut self,
        last_included_index: u64,
        last_config: &Membership,
    ) -> Result<()> {
        if last_included_index <= self.snapshot.last_included_index() {
            return Err(LogError::InvalidArgument(format!(
                "entry {} is already in the snapshot",
                last_included_index
            )));
        }
        // the state must cover every entry the snapshot will replace
        self.state_machine.sync_applied()?;
        self.apply_committed()?;
        self.state_machine.sync_applied()?;
        let last_applied = self.state_machine.last_applied();
        let boundary = last_included_index.max(last_applied);
        if boundary > self.sequence.commit_index() {
            return Err(LogError::InvalidArgument(format!(
                "cannot compact uncommitted entry {}",
                boundary
            )));
        }
        if last_applied < last_included_index {
            return Err(LogError::IllegalState(format!(
                "state machine applied up to {}, snapshot needs {}",
                last_applied, last_included_index
            )));
        }
        let last_entry = self.sequence.entry_meta(boundary)?.ok_or_else(|| {
            LogError::InvalidArgument(format!("entry {} not found", boundary))
        })?;
        let last_config = self
            .group_configs
            .iter()
            .rev()
            .find(|e| e.index > last_included_index && e.index <= boundary)
            .and_then(Entry::result_node_endpoints)
            .unwrap_or_else(|| last_config.clone());

        info!(
            target: "raft::snapshot",
            last_included_index = boundary,
            last_included_term = last_entry.term,
            "generating snapshot"
        );
        let staged = self
            .storage
            .write_snapshot(last_entry, &last_config, self.state_machine.as_mut())?;
        let remaining = self.sequence.sub_view(boundary + 1)?;
        self.replace_snapshot(staged, remaining)
    }

    fn replace_snapshot(&mut self, staged: S::Staged, remaining: Vec<Entry>) -> Result<()> {
        let last_included_index = staged.last_included_index();
        let last_index = remaining.last().map_or(last_included_index, |e| e.index);
        let commit_index = self
            .sequence
            .commit_index()
            .max(last_included_index)
            .min(last_index);
        self.storage.replace_snapshot(
            &mut self.snapshot,
            &mut self.sequence,
            staged,
            remaining,
            commit_index,
        )?;
        self.group_configs = self.sequence.build_group_config_entry_list()?;
        Ok(())
    }

    /// Release files and stop the state machine
    pub fn close(mut self) -> Result<()> {
        let snapshot = self.snapshot.close();
        let sequence = self.sequence.close();
        let state_machine = self.state_machine.shutdown();
        snapshot.and(sequence).and(state_machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventQueue, LogEvent};

    #[test]
    fn listener_context_forwards_snapshot_requests() {
        let queue = EventQueue::new();
        let mut listener = queue.clone();
        let mut context = ListenerContext {
            listener: &mut listener,
        };
        context.generate_snapshot(4);
        assert_eq!(queue.drain(), vec![LogEvent::SnapshotGenerationRequested(4)]);
    }

    #[test]
    fn snapshot_config_follows_changes_up_to_boundary() {
        let mut log = MemoryLog::new();
        log.append_entry(1).unwrap();
        let add = log
            .append_entry_for_add_node(1, Membership::new(), NodeEndpoint::new("A", "localhost", 2333))
            .unwrap();
        log.advance_commit_index(2, 1).unwrap();

        // requested before the change, but the state machine already applied it
        log.generate_snapshot(1, &Membership::new()).unwrap();
        assert_eq!(log.snapshot().last_included_index(), 2);
        assert_eq!(
            Some(log.snapshot().last_config().clone()),
            add.result_node_endpoints()
        );
    }

    /// applies nothing, so it never catches up
    struct Stalled;

    impl StateMachine for Stalled {
        fn last_applied(&self) -> u64 {
            0
        }

        fn apply_log(
            &mut self,
            _context: &mut dyn StateMachineContext,
            _index: u64,
            _command: &[u8],
            _first_log_index: u64,
        ) -> Result<()> {
            Ok(())
        }

        fn advance_last_applied(&mut self, _index: u64) -> Result<()> {
            Ok(())
        }

        fn apply_snapshot(&mut self, _snapshot: &mut dyn Snapshot) -> Result<()> {
            Ok(())
        }

        fn generate_snapshot(&mut self, _output: &mut dyn std::io::Write) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn snapshot_ahead_of_applied_state_is_refused() {
        let mut log = MemoryLog::new();
        log.set_state_machine(Stalled);
        log.append_entry_with_command(1, b"a".to_vec()).unwrap();
        log.append_entry_with_command(1, b"b".to_vec()).unwrap();
        log.advance_commit_index(2, 1).unwrap();

        assert!(matches!(
            log.generate_snapshot(2, &Membership::new()),
            Err(LogError::IllegalState(_))
        ));
        assert_eq!(log.snapshot().last_included_index(), 0);
        assert_eq!(log.next_index(), 3);
    }
}

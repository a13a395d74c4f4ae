//! # file
//!
//! why: survive restarts by keeping each snapshot and its following entries in one generation directory
//! relations: LogStorage over dir.rs, sequence/file.rs and snapshot/file.rs
//! what: FileStorage with durable generation rotation, FileLog::open recovery

use super::{Log, LogStorage};
use crate::dir::RootDir;
use crate::sequence::{EntrySequence, FileEntrySequence};
use crate::snapshot::{
    EmptySnapshot, FileSnapshot, FileSnapshotBuilder, FileSnapshotWriter, Snapshot, StagedSnapshot,
};
use crate::state_machine::StateMachine;
use raft_core::{Entry, EntryMeta, InstallSnapshotRpc, LogConfig, LogError, Membership, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::info;

/// Generation directories under one root
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: RootDir,
    config: LogConfig,
}

impl FileStorage {
    pub fn root(&self) -> &RootDir {
        &self.root
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }
}

impl LogStorage for FileStorage {
    type Sequence = FileEntrySequence<File>;
    type Staged = StagedSnapshot;
    type Builder = FileSnapshotBuilder;

    fn snapshot_builder(&mut self, first_chunk: &InstallSnapshotRpc) -> Result<FileSnapshotBuilder> {
        FileSnapshotBuilder::new(first_chunk, self.root.dir_for_installing()?)
    }

    fn write_snapshot(
        &mut self,
        last_entry: EntryMeta,
        last_config: &Membership,
        state_machine: &mut dyn StateMachine,
    ) -> Result<StagedSnapshot> {
        let dir = self.root.dir_for_generating()?;
        let file = File::create(dir.snapshot_file())?;
        let mut writer = FileSnapshotWriter::new(
            BufWriter::new(file),
            last_entry.index,
            last_entry.term,
            last_config,
        )?;
        state_machine.generate_snapshot(&mut writer)?;
        let file = writer
            .into_inner()
            .into_inner()
            .map_err(|e| LogError::Io(e.into_error()))?;
        file.sync_all()?;
        StagedSnapshot::open(dir)
    }

    fn replace_snapshot(
        &mut self,
        current: &mut Box<dyn Snapshot>,
        sequence: &mut FileEntrySequence<File>,
        staged: StagedSnapshot,
        remaining: Vec<Entry>,
        commit_index: u64,
    ) -> Result<()> {
        let last_included_index = staged.last_included_index();
        let log_index_offset = last_included_index + 1;
        let (persisted, pending): (Vec<Entry>, Vec<Entry>) =
            remaining.into_iter().partition(|e| e.index <= commit_index);

        let dir = staged.dir().clone();
        drop(staged);
        {
            let mut staged_sequence = FileEntrySequence::open(&dir, log_index_offset, false)?;
            staged_sequence.append_all(persisted)?;
            staged_sequence.commit(commit_index)?;
            staged_sequence.close()?;
        }
        let generation = self.root.promote(&dir, last_included_index)?;

        current.close()?;
        sequence.close()?;
        let mut next = FileEntrySequence::open(
            generation.dir(),
            log_index_offset,
            self.config.sync_on_commit,
        )?;
        next.append_all(pending)?;
        *current = Box::new(FileSnapshot::open(generation.dir())?);
        *sequence = next;

        self.root.prune(self.config.retained_generations)
    }
}

/// Log persisted under a root directory
pub type FileLog = Log<FileStorage>;

impl FileLog {
    /// Recover the latest generation under `base`, or start the first one
    pub fn open(base: impl AsRef<Path>, config: LogConfig) -> Result<Self> {
        config.validate()?;
        let root = RootDir::open(base.as_ref())?;
        let generation = match root.latest_generation()? {
            Some(generation) => generation,
            None => root.create_first_generation()?,
        };

        let snapshot: Box<dyn Snapshot> = if generation.dir().has_snapshot() {
            Box::new(FileSnapshot::open(generation.dir())?)
        } else {
            Box::new(EmptySnapshot::new())
        };
        let sequence = FileEntrySequence::open(
            generation.dir(),
            generation.last_included_index() + 1,
            config.sync_on_commit,
        )?;
        info!(
            target: "raft::log",
            dir = %generation.dir().path().display(),
            last_included_index = snapshot.last_included_index(),
            next_index = sequence.next_log_index(),
            commit_index = sequence.commit_index(),
            "opened log"
        );
        Log::assemble(FileStorage { root, config }, snapshot, sequence)
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::NodeId;
    use tempfile::tempdir;

    fn config(retained_generations: usize) -> LogConfig {
        LogConfig {
            retained_generations,
            ..LogConfig::default()
        }
    }

    #[test]
    fn open_creates_first_generation() {
        let dir = tempdir().unwrap();
        let log = FileLog::open(dir.path(), LogConfig::default()).unwrap();
        assert_eq!(log.next_index(), 1);
        assert!(dir.path().join("log-0").is_dir());
    }

    #[test]
    fn open_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FileLog::open(dir.path(), config(0)),
            Err(LogError::InvalidArgument(_))
        ));
    }

    #[test]
    fn committed_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::open(dir.path(), LogConfig::default()).unwrap();
        log.append_entry(1).unwrap();
        log.append_entry_with_command(1, b"a".to_vec()).unwrap();
        log.append_entry_with_command(1, b"b".to_vec()).unwrap();
        log.advance_commit_index(2, 1).unwrap();
        log.close().unwrap();

        let mut log = FileLog::open(dir.path(), LogConfig::default()).unwrap();
        assert_eq!(log.next_index(), 3);
        assert_eq!(log.commit_index(), 2);
        let rpc = log.create_append_entries_rpc(1, &NodeId::new("A"), 2, None).unwrap();
        assert_eq!(rpc.entries, vec![Entry::general(2, 1, b"a".to_vec())]);
    }

    #[test]
    fn rotation_keeps_configured_generations() {
        let dir = tempdir().unwrap();
        let mut log = FileLog::open(dir.path(), config(1)).unwrap();
        for index in 1..=4 {
            log.append_entry_with_command(1, vec![index as u8]).unwrap();
        }
        log.advance_commit_index(3, 1).unwrap();
        log.generate_snapshot(3, &Membership::new()).unwrap();

        let generations = log.storage().root().generations().unwrap();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].last_included_index(), 3);
        assert!(!dir.path().join("generating").exists());
        // the uncommitted entry 4 moved over as pending
        assert_eq!(log.next_index(), 5);
        assert_eq!(log.sequence().pending_len(), 1);
    }
}

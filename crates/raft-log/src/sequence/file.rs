//! # file
//!
//! why: persist committed entries while keeping the uncommitted tail cheap to rewrite
//! relations: implements sequence::EntrySequence on top of entries_file.rs and index_file.rs
//! what: FileEntrySequence with a persisted prefix and a pending in-memory tail

use super::EntrySequence;
use crate::dir::LogDir;
use crate::entries_file::EntriesFile;
use crate::file::SeekableFile;
use crate::group_config::GroupConfigEntryList;
use crate::index_file::EntryIndexFile;
use raft_core::{Entry, EntryMeta, LogError, Result};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::{debug, warn};

/// Entry sequence whose committed prefix lives in an entries file plus index file
///
/// Entries up to `commit_index` are on disk, later ones stay in `pending`
/// until committed.
pub struct FileEntrySequence<F: SeekableFile = File> {
    entries_file: EntriesFile<F>,
    index_file: EntryIndexFile<F>,
    pending: VecDeque<Entry>,
    log_index_offset: u64,
    next_log_index: u64,
    commit_index: u64,
    sync_on_commit: bool,
}

impl FileEntrySequence<File> {
    /// Open the entries and index files inside `dir`
    pub fn open(dir: &LogDir, log_index_offset: u64, sync_on_commit: bool) -> Result<Self> {
        let entries = open_rw(&dir.entries_file())?;
        let index = open_rw(&dir.entry_index_file())?;
        Self::new(entries, index, log_index_offset, sync_on_commit)
    }
}

fn open_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

impl<F: SeekableFile> FileEntrySequence<F> {
    /// Build a sequence over existing stores, recovering bounds from the index
    pub fn new(entries: F, index: F, log_index_offset: u64, sync_on_commit: bool) -> Result<Self> {
        let log_index_offset = log_index_offset.max(1);
        let mut sequence = Self {
            entries_file: EntriesFile::new(entries),
            index_file: EntryIndexFile::open(index)?,
            pending: VecDeque::new(),
            log_index_offset,
            next_log_index: log_index_offset,
            commit_index: log_index_offset - 1,
            sync_on_commit,
        };
        sequence.initialize()?;
        Ok(sequence)
    }

    fn initialize(&mut self) -> Result<()> {
        if self.index_file.is_empty() {
            self.discard_unindexed_entries(0)?;
            return Ok(());
        }
        let max = self.index_file.max_entry_index();
        self.log_index_offset = self.index_file.min_entry_index();
        self.next_log_index = max + 1;
        self.commit_index = max;

        let end = self.entries_file.entry_end(self.index_file.offset(max)?)?;
        self.discard_unindexed_entries(end)
    }

    /// Cut records an interrupted commit wrote without indexing them
    fn discard_unindexed_entries(&mut self, end: u64) -> Result<()> {
        let size = self.entries_file.size()?;
        if size > end {
            warn!(
                target: "raft::sequence",
                size,
                end,
                "dropping entries missing from the index file"
            );
            self.entries_file.truncate(end)?;
        } else if size < end {
            return Err(LogError::Corrupted(format!(
                "entries file of {} bytes ends before indexed entry at {}",
                size, end
            )));
        }
        Ok(())
    }

    /// Number of entries held only in memory
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn first_pending_index(&self) -> Option<u64> {
        self.pending.front().map(|e| e.index)
    }

    fn load_persisted(&mut self, index: u64) -> Result<Entry> {
        let offset = self.index_file.offset(index)?;
        self.entries_file.load_entry(offset)
    }

    fn sync(&mut self) -> Result<()> {
        self.entries_file.sync()?;
        self.index_file.sync()
    }
}

impl<F: SeekableFile> EntrySequence for FileEntrySequence<F> {
    fn log_index_offset(&self) -> u64 {
        self.log_index_offset
    }

    fn next_log_index(&self) -> u64 {
        self.next_log_index
    }

    fn commit_index(&self) -> u64 {
        self.commit_index
    }

    fn commit(&mut self, index: u64) -> Result<()> {
        if index < self.commit_index {
            return Err(LogError::InvalidArgument(format!(
                "commit index {} < {}",
                index, self.commit_index
            )));
        }
        if index == self.commit_index {
            return Ok(());
        }
        if self.pending.back().map_or(true, |e| e.index < index) {
            return Err(LogError::InvalidArgument(format!(
                "no pending entry {} to commit",
                index
            )));
        }
        for i in self.commit_index + 1..=index {
            let entry = self.pending.pop_front().ok_or_else(|| {
                LogError::IllegalState(format!("pending entry {} missing", i))
            })?;
            let offset = self.entries_file.append_entry(&entry)?;
            self.index_file
                .append_entry_index(i, offset, entry.kind(), entry.term)?;
            self.commit_index = i;
        }
        if self.sync_on_commit {
            self.sync()?;
        }
        debug!(target: "raft::sequence", commit_index = index, "committed entries to file");
        Ok(())
    }

    fn build_group_config_entry_list(&mut self) -> Result<GroupConfigEntryList> {
        let mut list = GroupConfigEntryList::new();
        for item in self.index_file.iter() {
            if item.kind.is_group_config() {
                list.add(self.entries_file.load_entry(item.offset)?);
            }
        }
        for entry in self.pending.iter().filter(|e| e.is_group_config()) {
            list.add(entry.clone());
        }
        Ok(list)
    }

    fn close(&mut self) -> Result<()> {
        self.sync()
    }

    fn do_get_entry(&mut self, index: u64) -> Result<Entry> {
        if let Some(first) = self.first_pending_index() {
            if index >= first {
                return Ok(self.pending[(index - first) as usize].clone());
            }
        }
        self.load_persisted(index)
    }

    fn do_get_entry_meta(&self, index: u64) -> Result<EntryMeta> {
        if let Some(first) = self.first_pending_index() {
            if index >= first {
                return Ok(self.pending[(index - first) as usize].meta());
            }
        }
        self.index_file
            .get(index)
            .map(|item| item.to_entry_meta())
            .ok_or_else(|| LogError::Corrupted(format!("entry {} missing from index file", index)))
    }

    fn do_sub_list(&mut self, from_index: u64, to_index: u64) -> Result<Vec<Entry>> {
        let mut result = Vec::new();
        if !self.index_file.is_empty() && from_index <= self.index_file.max_entry_index() {
            let end = (self.index_file.max_entry_index() + 1).min(to_index);
            for index in from_index..end {
                result.push(self.load_persisted(index)?);
            }
        }
        result.extend(
            self.pending
                .iter()
                .take_while(|e| e.index < to_index)
                .filter(|e| e.index >= from_index)
                .cloned(),
        );
        Ok(result)
    }

    fn do_append(&mut self, entry: Entry) -> Result<()> {
        self.pending.push_back(entry);
        self.next_log_index += 1;
        Ok(())
    }

    fn do_remove_after(&mut self, index: u64) -> Result<()> {
        if let Some(first) = self.first_pending_index() {
            if index + 1 >= first {
                self.pending.truncate((index + 1 - first) as usize);
                self.next_log_index = index + 1;
                return Ok(());
            }
        }

        self.pending.clear();
        if index >= self.log_index_offset {
            let offset = self.index_file.offset(index + 1)?;
            self.entries_file.truncate(offset)?;
            self.index_file.remove_after(index)?;
            self.next_log_index = index + 1;
            self.commit_index = index;
        } else {
            self.entries_file.clear()?;
            self.index_file.clear()?;
            self.next_log_index = self.log_index_offset;
            self.commit_index = self.log_index_offset - 1;
        }
        warn!(
            target: "raft::sequence",
            index,
            commit_index = self.commit_index,
            "truncated persisted entries"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;
    use raft_core::{NodeEndpoint, NodeId};
    use tempfile::tempdir;

    fn memory_sequence(offset: u64) -> FileEntrySequence<MemoryFile> {
        FileEntrySequence::new(MemoryFile::new(), MemoryFile::new(), offset, true).unwrap()
    }

    fn with_entries(offset: u64, count: u64) -> FileEntrySequence<MemoryFile> {
        let mut sequence = memory_sequence(offset);
        for index in offset..offset + count {
            sequence
                .append(Entry::general(index, 1, format!("cmd{}", index).into_bytes()))
                .unwrap();
        }
        sequence
    }

    #[test]
    fn appended_entries_stay_pending() {
        let mut sequence = with_entries(1, 2);
        assert_eq!(sequence.pending_len(), 2);
        assert_eq!(sequence.commit_index(), 0);
        assert_eq!(sequence.entry(2).unwrap().unwrap().index, 2);
        assert_eq!(sequence.entries_file.size().unwrap(), 0);
    }

    #[test]
    fn commit_moves_entries_to_file() {
        let mut sequence = with_entries(1, 3);
        sequence.commit(2).unwrap();
        assert_eq!(sequence.commit_index(), 2);
        assert_eq!(sequence.pending_len(), 1);
        assert_eq!(sequence.index_file.max_entry_index(), 2);
        assert_eq!(sequence.entry(1).unwrap().unwrap(), Entry::general(1, 1, b"cmd1".to_vec()));
        assert_eq!(sequence.entry_meta(3).unwrap().unwrap().index, 3);
    }

    #[test]
    fn commit_beyond_pending_fails() {
        let mut sequence = with_entries(1, 2);
        assert!(sequence.commit(3).is_err());
        sequence.commit(2).unwrap();
        assert!(sequence.commit(1).is_err());
        sequence.commit(2).unwrap();
    }

    #[test]
    fn sub_list_spans_file_and_pending() {
        let mut sequence = with_entries(1, 5);
        sequence.commit(3).unwrap();
        let indices: Vec<u64> = sequence.sub_list(2, 5).unwrap().iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
        assert_eq!(sequence.sub_view(1).unwrap().len(), 5);
    }

    #[test]
    fn remove_after_only_touches_pending_when_possible() {
        let mut sequence = with_entries(1, 4);
        sequence.commit(2).unwrap();
        sequence.remove_after(2).unwrap();
        assert_eq!(sequence.next_log_index(), 3);
        assert_eq!(sequence.pending_len(), 0);
        assert_eq!(sequence.index_file.max_entry_index(), 2);
    }

    #[test]
    fn remove_after_truncates_files() {
        let mut sequence = with_entries(1, 4);
        sequence.commit(3).unwrap();
        sequence.remove_after(1).unwrap();
        assert_eq!(sequence.next_log_index(), 2);
        assert_eq!(sequence.commit_index(), 1);
        assert_eq!(sequence.index_file.max_entry_index(), 1);
        assert_eq!(sequence.entries_file.size().unwrap(), 16 + 4);

        sequence.append(Entry::no_op(2, 2)).unwrap();
        sequence.commit(2).unwrap();
        assert_eq!(sequence.entry(2).unwrap().unwrap(), Entry::no_op(2, 2));
    }

    #[test]
    fn remove_after_before_offset_clears_everything() {
        let mut sequence = with_entries(3, 3);
        sequence.commit(4).unwrap();
        sequence.remove_after(1).unwrap();
        assert!(sequence.is_empty());
        assert_eq!(sequence.next_log_index(), 3);
        assert_eq!(sequence.commit_index(), 2);
        assert!(sequence.index_file.is_empty());
    }

    #[test]
    fn group_config_list_reads_file_and_pending() {
        let endpoints: raft_core::Membership =
            [NodeEndpoint::new("A", "localhost", 2333)].into_iter().collect();
        let mut sequence = memory_sequence(1);
        sequence.append(Entry::no_op(1, 1)).unwrap();
        sequence
            .append(Entry::add_node(2, 1, endpoints.clone(), NodeEndpoint::new("B", "localhost", 2334)))
            .unwrap();
        sequence.append(Entry::general(3, 1, b"x".to_vec())).unwrap();
        sequence
            .append(Entry::remove_node(4, 1, endpoints, NodeId::new("A")))
            .unwrap();
        sequence.commit(3).unwrap();

        let list = sequence.build_group_config_entry_list().unwrap();
        let indices: Vec<u64> = list.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![2, 4]);
    }

    #[test]
    fn reopen_restores_committed_entries() {
        let dir = tempdir().unwrap();
        let log_dir = LogDir::new(dir.path().join("log-0"));
        log_dir.initialize().unwrap();
        {
            let mut sequence = FileEntrySequence::open(&log_dir, 1, true).unwrap();
            for index in 1..=3 {
                sequence.append(Entry::general(index, 2, vec![index as u8])).unwrap();
            }
            sequence.commit(2).unwrap();
            sequence.close().unwrap();
        }
        let mut sequence = FileEntrySequence::open(&log_dir, 1, true).unwrap();
        assert_eq!(sequence.next_log_index(), 3);
        assert_eq!(sequence.commit_index(), 2);
        assert_eq!(sequence.entry(2).unwrap().unwrap(), Entry::general(2, 2, vec![2]));
    }

    #[test]
    fn reopen_drops_unindexed_entry_records() {
        let mut sequence = with_entries(1, 1);
        sequence.commit(1).unwrap();
        let FileEntrySequence {
            mut entries_file,
            index_file,
            ..
        } = sequence;
        // written by a commit that crashed before indexing
        entries_file.append_entry(&Entry::no_op(2, 1)).unwrap();

        let reopened =
            FileEntrySequence::new(entries_file.into_inner(), index_file.into_inner(), 1, true)
                .unwrap();
        assert_eq!(reopened.next_log_index(), 2);
        assert_eq!(reopened.entries_file.size().unwrap(), 16 + 4);
    }
}

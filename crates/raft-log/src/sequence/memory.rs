//! # memory
//!
//! why: keep the whole log in memory for tests and the memory-backed log
//! relations: implements sequence::EntrySequence, used by log/memory.rs
//! what: MemoryEntrySequence with full commit tracking

use super::EntrySequence;
use crate::group_config::GroupConfigEntryList;
use raft_core::{Entry, EntryMeta, LogError, Result};

/// Entry sequence held entirely in memory
///
/// Committing only moves the commit boundary, nothing is persisted.
#[derive(Debug, Clone)]
pub struct MemoryEntrySequence {
    log_index_offset: u64,
    next_log_index: u64,
    commit_index: u64,
    entries: Vec<Entry>,
}

impl Default for MemoryEntrySequence {
    fn default() -> Self {
        Self::new(1)
    }
}

impl MemoryEntrySequence {
    /// Create an empty sequence whose first entry will carry `log_index_offset`
    pub fn new(log_index_offset: u64) -> Self {
        let log_index_offset = log_index_offset.max(1);
        Self {
            log_index_offset,
            next_log_index: log_index_offset,
            commit_index: log_index_offset - 1,
            entries: Vec::new(),
        }
    }

    fn position(&self, index: u64) -> usize {
        (index - self.log_index_offset) as usize
    }
}

impl EntrySequence for MemoryEntrySequence {
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
        if index >= self.next_log_index {
            return Err(LogError::InvalidArgument(format!(
                "no entry {} to commit",
                index
            )));
        }
        self.commit_index = index;
        Ok(())
    }

    fn build_group_config_entry_list(&mut self) -> Result<GroupConfigEntryList> {
        let mut list = GroupConfigEntryList::new();
        for entry in self.entries.iter().filter(|e| e.is_group_config()) {
            list.add(entry.clone());
        }
        Ok(list)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    fn do_get_entry(&mut self, index: u64) -> Result<Entry> {
        Ok(self.entries[self.position(index)].clone())
    }

    fn do_get_entry_meta(&self, index: u64) -> Result<EntryMeta> {
        Ok(self.entries[self.position(index)].meta())
    }

    fn do_sub_list(&mut self, from_index: u64, to_index: u64) -> Result<Vec<Entry>> {
        let from = self.position(from_index);
        let to = self.position(to_index);
        Ok(self.entries[from..to].to_vec())
    }

    fn do_append(&mut self, entry: Entry) -> Result<()> {
        self.entries.push(entry);
        self.next_log_index += 1;
        Ok(())
    }

    fn do_remove_after(&mut self, index: u64) -> Result<()> {
        if index < self.log_index_offset {
            self.entries.clear();
            self.next_log_index = self.log_index_offset;
        } else {
            let keep = self.position(index) + 1;
            self.entries.truncate(keep);
            self.next_log_index = index + 1;
        }
        self.commit_index = self.commit_index.min(self.next_log_index - 1);
        Ok(())
    }
}

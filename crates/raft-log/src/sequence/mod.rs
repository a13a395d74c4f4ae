//! # sequence
//!
//! why: present the stored entries as one contiguous, index-addressed sequence
//! relations: implemented by memory.rs and file.rs, owned and driven by the log facade
//! what: EntrySequence trait whose provided methods hold the shared bounds checks

pub mod file;
pub mod memory;

pub use file::FileEntrySequence;
pub use memory::MemoryEntrySequence;

use crate::group_config::GroupConfigEntryList;
use raft_core::{Entry, EntryMeta, LogError, Result};

/// Ordered entries from `first_log_index` to `next_log_index - 1` with a commit boundary
///
/// Implementors provide the `do_*` hooks, which are only called with indices
/// already checked against the sequence bounds. Not safe for concurrent
/// mutation: every write must come from the thread that owns the log.
pub trait EntrySequence {
    /// Index the first stored entry has, or would have when the sequence is empty
    fn log_index_offset(&self) -> u64;

    /// Index the next appended entry must carry
    fn next_log_index(&self) -> u64;

    /// Highest committed index, `log_index_offset - 1` before anything is committed
    fn commit_index(&self) -> u64;

    /// Mark every entry up to `index` as committed
    fn commit(&mut self, index: u64) -> Result<()>;

    /// Collect membership-change entries in index order
    fn build_group_config_entry_list(&mut self) -> Result<GroupConfigEntryList>;

    /// Flush and release underlying storage
    fn close(&mut self) -> Result<()>;

    fn do_get_entry(&mut self, index: u64) -> Result<Entry>;

    fn do_get_entry_meta(&self, index: u64) -> Result<EntryMeta>;

    fn do_sub_list(&mut self, from_index: u64, to_index: u64) -> Result<Vec<Entry>>;

    /// Store an entry already checked to carry `next_log_index`
    fn do_append(&mut self, entry: Entry) -> Result<()>;

    /// Drop entries after `index`, which is below the last log index
    fn do_remove_after(&mut self, index: u64) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.log_index_offset() == self.next_log_index()
    }

    fn first_log_index(&self) -> Result<u64> {
        if self.is_empty() {
            return Err(LogError::EmptySequence);
        }
        Ok(self.log_index_offset())
    }

    fn last_log_index(&self) -> Result<u64> {
        if self.is_empty() {
            return Err(LogError::EmptySequence);
        }
        Ok(self.next_log_index() - 1)
    }

    fn is_entry_present(&self, index: u64) -> bool {
        !self.is_empty() && index >= self.log_index_offset() && index < self.next_log_index()
    }

    fn entry(&mut self, index: u64) -> Result<Option<Entry>> {
        if !self.is_entry_present(index) {
            return Ok(None);
        }
        self.do_get_entry(index).map(Some)
    }

    fn entry_meta(&self, index: u64) -> Result<Option<EntryMeta>> {
        if !self.is_entry_present(index) {
            return Ok(None);
        }
        self.do_get_entry_meta(index).map(Some)
    }

    fn last_entry(&mut self) -> Result<Option<Entry>> {
        if self.is_empty() {
            return Ok(None);
        }
        let last = self.next_log_index() - 1;
        self.do_get_entry(last).map(Some)
    }

    fn last_entry_meta(&self) -> Result<Option<EntryMeta>> {
        if self.is_empty() {
            return Ok(None);
        }
        self.do_get_entry_meta(self.next_log_index() - 1).map(Some)
    }

    /// Entries from `from_index` to the end, empty when nothing is stored there
    fn sub_view(&mut self, from_index: u64) -> Result<Vec<Entry>> {
        if self.is_empty() || from_index >= self.next_log_index() {
            return Ok(Vec::new());
        }
        let from_index = from_index.max(self.log_index_offset());
        let to_index = self.next_log_index();
        self.do_sub_list(from_index, to_index)
    }

    /// Entries in `[from_index, to_index)`, with `from_index` clipped to the first index
    fn sub_list(&mut self, from_index: u64, to_index: u64) -> Result<Vec<Entry>> {
        if self.is_empty() {
            return Err(LogError::EmptySequence);
        }
        let from_index = from_index.max(self.log_index_offset());
        if to_index > self.next_log_index() || from_index > to_index {
            return Err(LogError::InvalidArgument(format!(
                "illegal from index {} or to index {}",
                from_index, to_index
            )));
        }
        self.do_sub_list(from_index, to_index)
    }

    fn append(&mut self, entry: Entry) -> Result<()> {
        if entry.index != self.next_log_index() {
            return Err(LogError::InvalidArgument(format!(
                "entry index must be {}, but was {}",
                self.next_log_index(),
                entry.index
            )));
        }
        self.do_append(entry)
    }

    fn append_all(&mut self, entries: Vec<Entry>) -> Result<()> {
        for entry in entries {
            self.append(entry)?;
        }
        Ok(())
    }

    /// Drop every entry after `index`; clears the sequence when `index` precedes it
    fn remove_after(&mut self, index: u64) -> Result<()> {
        if self.is_empty() || index >= self.next_log_index() - 1 {
            return Ok(());
        }
        self.do_remove_after(index)
    }
}

//! # index_file
//!
//! why: locate committed entries by index without scanning the entries file
//! relations: maintained next to entries_file.rs by sequence/file.rs
//! what: EntryIndexFile with a `[min][max]` header, fixed 16-byte records and an in-memory mirror

use crate::entries_file::to_u32;
use crate::file::SeekableFile;
use raft_core::{EntryKind, EntryMeta, LogError, Result};
use tracing::warn;

const OFFSET_MAX_ENTRY_INDEX: u64 = 4;
const HEADER_SIZE: u64 = 4 * 2;
/// offset:8 kind:4 term:4
pub const ENTRY_INDEX_ITEM_SIZE: u64 = 16;

/// Location and metadata of one committed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryIndexItem {
    pub index: u64,
    pub offset: u64,
    pub kind: EntryKind,
    pub term: u64,
}

impl EntryIndexItem {
    pub fn to_entry_meta(&self) -> EntryMeta {
        EntryMeta::new(self.kind, self.index, self.term)
    }
}

/// Fixed-width index over an entries file
///
/// The whole file is mirrored in memory; opening it costs one linear scan.
pub struct EntryIndexFile<F: SeekableFile> {
    file: F,
    min_entry_index: u64,
    max_entry_index: u64,
    items: Vec<EntryIndexItem>,
}

impl<F: SeekableFile> EntryIndexFile<F> {
    /// Open an index file and load every record into memory
    pub fn open(file: F) -> Result<Self> {
        let mut index_file = Self {
            file,
            min_entry_index: 0,
            max_entry_index: 0,
            items: Vec::new(),
        };
        index_file.load()?;
        Ok(index_file)
    }

    fn load(&mut self) -> Result<()> {
        let size = self.file.size()?;
        if size == 0 {
            return Ok(());
        }
        if size < HEADER_SIZE {
            return self.drop_unfinished_first_record(size);
        }
        self.file.seek_to(0)?;
        let min = u64::from(self.file.read_u32()?);
        let max = u64::from(self.file.read_u32()?);
        if max < min {
            return Err(LogError::Corrupted(format!(
                "entry index header min {} > max {}",
                min, max
            )));
        }
        self.min_entry_index = min;
        self.max_entry_index = max;

        let expected = self.item_offset(max + 1);
        if size < expected && min == max {
            // the first record is the only one written before its header
            return self.drop_unfinished_first_record(size);
        }
        if size < expected {
            return Err(LogError::Corrupted(format!(
                "entry index file of {} bytes is shorter than {} records",
                size,
                max - min + 1
            )));
        }

        self.items = Vec::with_capacity((max - min + 1) as usize);
        for index in min..=max {
            let offset = self.file.read_u64()?;
            let kind = EntryKind::from_u32(self.file.read_u32()?)?;
            let term = u64::from(self.file.read_u32()?);
            self.items.push(EntryIndexItem {
                index,
                offset,
                kind,
                term,
            });
        }

        if size > expected {
            warn!(
                target: "raft::sequence",
                size,
                expected,
                "dropping partially written entry index record"
            );
            self.file.truncate(expected)?;
        }
        Ok(())
    }

    fn drop_unfinished_first_record(&mut self, size: u64) -> Result<()> {
        warn!(
            target: "raft::sequence",
            size,
            "dropping unfinished first entry index record"
        );
        self.file.truncate(0)?;
        self.min_entry_index = 0;
        self.max_entry_index = 0;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn min_entry_index(&self) -> u64 {
        self.min_entry_index
    }

    pub fn max_entry_index(&self) -> u64 {
        self.max_entry_index
    }

    pub fn entry_index_count(&self) -> usize {
        self.items.len()
    }

    pub fn get(&self, index: u64) -> Option<&EntryIndexItem> {
        if self.is_empty() || index < self.min_entry_index || index > self.max_entry_index {
            return None;
        }
        self.items.get((index - self.min_entry_index) as usize)
    }

    /// Offset of entry `index` inside the entries file
    pub fn offset(&self, index: u64) -> Result<u64> {
        self.get(index).map(|item| item.offset).ok_or_else(|| {
            LogError::InvalidArgument(format!("entry {} is not in the index file", index))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryIndexItem> {
        self.items.iter()
    }

    /// Record entry `index`; indices must be appended without gaps
    pub fn append_entry_index(
        &mut self,
        index: u64,
        offset: u64,
        kind: EntryKind,
        term: u64,
    ) -> Result<()> {
        let index32 = to_u32(index, "entry index")?;
        if self.is_empty() {
            self.file.truncate(0)?;
            self.file.seek_to(0)?;
            self.file.write_u32(index32)?;
            self.file.write_u32(index32)?;
            self.min_entry_index = index;
        } else if index != self.max_entry_index + 1 {
            return Err(LogError::InvalidArgument(format!(
                "index must be {}, but was {}",
                self.max_entry_index + 1,
                index
            )));
        }

        // record first, then publish it through the header
        self.file.seek_to(self.item_offset(index))?;
        self.file.write_u64(offset)?;
        self.file.write_u32(kind.as_u32())?;
        self.file.write_u32(to_u32(term, "entry term")?)?;
        self.file.seek_to(OFFSET_MAX_ENTRY_INDEX)?;
        self.file.write_u32(index32)?;

        self.max_entry_index = index;
        self.items.push(EntryIndexItem {
            index,
            offset,
            kind,
            term,
        });
        Ok(())
    }

    /// Keep records up to and including `new_max_entry_index`
    pub fn remove_after(&mut self, new_max_entry_index: u64) -> Result<()> {
        if self.is_empty() || new_max_entry_index >= self.max_entry_index {
            return Ok(());
        }
        if new_max_entry_index < self.min_entry_index {
            return self.clear();
        }
        self.file.seek_to(OFFSET_MAX_ENTRY_INDEX)?;
        self.file
            .write_u32(to_u32(new_max_entry_index, "entry index")?)?;
        self.file.truncate(self.item_offset(new_max_entry_index + 1))?;
        self.items
            .truncate((new_max_entry_index - self.min_entry_index + 1) as usize);
        self.max_entry_index = new_max_entry_index;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.file.truncate(0)?;
        self.items.clear();
        self.min_entry_index = 0;
        self.max_entry_index = 0;
        Ok(())
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.size()?)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()?;
        Ok(())
    }

    pub fn into_inner(self) -> F {
        self.file
    }

    fn item_offset(&self, index: u64) -> u64 {
        (index - self.min_entry_index) * ENTRY_INDEX_ITEM_SIZE + HEADER_SIZE
    }
}

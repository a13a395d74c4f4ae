//! # entries_file
//!
//! why: store committed entries append-only so they survive restarts
//! relations: written by sequence/file.rs on commit, located through index_file.rs
//! what: EntriesFile with length-prefixed `[kind][index][term][len][payload]` records

use crate::file::SeekableFile;
use raft_core::{Entry, EntryKind, LogError, Result};

/// Bytes of the fixed record header: kind, index, term and payload length
pub const ENTRY_HEADER_SIZE: u64 = 4 * 4;

/// Narrow a log position to the 32-bit field used on disk
pub(crate) fn to_u32(value: u64, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| LogError::Corrupted(format!("{} {} does not fit in 32 bits", field, value)))
}

/// Append-only file of serialized entries
pub struct EntriesFile<F: SeekableFile> {
    file: F,
}

impl<F: SeekableFile> EntriesFile<F> {
    pub fn new(file: F) -> Self {
        Self { file }
    }

    /// Write `entry` at the end of the file and return the offset it starts at
    pub fn append_entry(&mut self, entry: &Entry) -> Result<u64> {
        let command = entry.command_bytes()?;
        let offset = self.file.size()?;
        self.file.seek_to(offset)?;
        self.file.write_u32(entry.kind().as_u32())?;
        self.file.write_u32(to_u32(entry.index, "entry index")?)?;
        self.file.write_u32(to_u32(entry.term, "entry term")?)?;
        self.file.write_u32(to_u32(command.len() as u64, "payload length")?)?;
        self.file.write_all(&command)?;
        Ok(offset)
    }

    /// Decode the entry written at `offset`
    pub fn load_entry(&mut self, offset: u64) -> Result<Entry> {
        let size = self.file.size()?;
        if offset + ENTRY_HEADER_SIZE > size {
            return Err(LogError::InvalidArgument(format!(
                "entry offset {} beyond file size {}",
                offset, size
            )));
        }
        self.file.seek_to(offset)?;
        let kind = EntryKind::from_u32(self.file.read_u32()?)?;
        let index = u64::from(self.file.read_u32()?);
        let term = u64::from(self.file.read_u32()?);
        let length = u64::from(self.file.read_u32()?);
        if offset + ENTRY_HEADER_SIZE + length > size {
            return Err(LogError::Corrupted(format!(
                "entry at {} claims {} payload bytes past file size {}",
                offset, length, size
            )));
        }
        let command = self.file.read_bytes(length as usize)?;
        Entry::from_parts(kind, index, term, command)
    }

    /// Offset just past the record written at `offset`
    pub fn entry_end(&mut self, offset: u64) -> Result<u64> {
        let size = self.file.size()?;
        if offset + ENTRY_HEADER_SIZE > size {
            return Err(LogError::Corrupted(format!(
                "entry header at {} beyond file size {}",
                offset, size
            )));
        }
        self.file.seek_to(offset + ENTRY_HEADER_SIZE - 4)?;
        let length = u64::from(self.file.read_u32()?);
        Ok(offset + ENTRY_HEADER_SIZE + length)
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.size()?)
    }

    /// Drop every record starting at or after `offset`
    pub fn truncate(&mut self, offset: u64) -> Result<()> {
        self.file.truncate(offset)?;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.truncate(0)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()?;
        Ok(())
    }

    pub fn into_inner(self) -> F {
        self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::MemoryFile;
    use raft_core::{NodeEndpoint, NodeId};

    #[test]
    fn append_writes_header_and_payload() {
        let mut file = EntriesFile::new(MemoryFile::new());
        let offset = file
            .append_entry(&Entry::general(2, 3, b"test".to_vec()))
            .unwrap();
        assert_eq!(offset, 0);

        let bytes = file.into_inner().into_bytes();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 4, b't', b'e', b's', b't']
        );
    }

    #[test]
    fn load_entry_at_returned_offsets() {
        let mut file = EntriesFile::new(MemoryFile::new());
        let first = file.append_entry(&Entry::no_op(1, 2)).unwrap();
        let second = file
            .append_entry(&Entry::general(2, 3, b"set x 1".to_vec()))
            .unwrap();
        let endpoints = [NodeEndpoint::new("A", "localhost", 2333)].into_iter().collect();
        let third = file
            .append_entry(&Entry::remove_node(3, 3, endpoints, NodeId::new("A")))
            .unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 16);
        assert_eq!(file.load_entry(second).unwrap(), Entry::general(2, 3, b"set x 1".to_vec()));
        assert_eq!(file.load_entry(first).unwrap(), Entry::no_op(1, 2));
        assert_eq!(file.load_entry(third).unwrap().kind(), EntryKind::RemoveNode);
    }

    #[test]
    fn load_entry_beyond_end_is_rejected() {
        let mut file = EntriesFile::new(MemoryFile::new());
        file.append_entry(&Entry::no_op(1, 1)).unwrap();
        assert!(matches!(
            file.load_entry(16),
            Err(LogError::InvalidArgument(_))
        ));
    }

    #[test]
    fn payload_length_past_end_is_corrupted() {
        // header of a general entry claiming 4 GiB of payload
        let mut bytes = Vec::new();
        for field in [1u32, 1, 1, u32::MAX] {
            bytes.extend_from_slice(&field.to_be_bytes());
        }
        bytes.extend_from_slice(b"abc");
        let mut file = EntriesFile::new(MemoryFile::from_bytes(bytes));
        assert!(matches!(file.load_entry(0), Err(LogError::Corrupted(_))));
    }

    #[test]
    fn entry_end_skips_payload() {
        let mut file = EntriesFile::new(MemoryFile::new());
        let offset = file.append_entry(&Entry::general(1, 1, b"abc".to_vec())).unwrap();
        assert_eq!(file.entry_end(offset).unwrap(), 19);
    }

    #[test]
    fn truncate_drops_trailing_records() {
        let mut file = EntriesFile::new(MemoryFile::new());
        file.append_entry(&Entry::no_op(1, 1)).unwrap();
        let second = file.append_entry(&Entry::no_op(2, 1)).unwrap();
        file.truncate(second).unwrap();
        assert_eq!(file.size().unwrap(), 16);

        let offset = file.append_entry(&Entry::no_op(2, 2)).unwrap();
        assert_eq!(offset, second);
        assert_eq!(file.load_entry(offset).unwrap().term, 2);
    }
}

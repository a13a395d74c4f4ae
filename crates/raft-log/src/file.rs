//! # file
//!
//! why: give the durable log formats one random-access byte store to write to
//! relations: used by entries_file.rs, index_file.rs and snapshot files
//! what: SeekableFile trait with big-endian typed io, impls for std::fs::File and MemoryFile

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// A random-access byte store
///
/// Integers are written big-endian.
pub trait SeekableFile: Read + Write + Seek {
    /// Current length of the store in bytes
    fn size(&self) -> io::Result<u64>;

    /// Cut the store to `size` bytes, moving the position back if it pointed past the end
    fn truncate(&mut self, size: u64) -> io::Result<()>;

    /// Flush buffered data down to durable storage
    fn sync(&mut self) -> io::Result<()>;

    fn position(&mut self) -> io::Result<u64> {
        self.stream_position()
    }

    fn seek_to(&mut self, position: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn read_bytes(&mut self, length: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.write_all(&value.to_be_bytes())
    }

    fn write_u64(&mut self, value: u64) -> io::Result<()> {
        self.write_all(&value.to_be_bytes())
    }
}

impl SeekableFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.set_len(size)?;
        if self.stream_position()? > size {
            self.seek(SeekFrom::Start(size))?;
        }
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_all()
    }
}

/// In-memory byte store for tests and the memory-backed log
#[derive(Debug, Default, Clone)]
pub struct MemoryFile {
    cursor: Cursor<Vec<u8>>,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.cursor.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.cursor.seek(pos)
    }
}

impl SeekableFile for MemoryFile {
    fn size(&self) -> io::Result<u64> {
        Ok(self.cursor.get_ref().len() as u64)
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        let size = usize::try_from(size)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "size exceeds memory"))?;
        self.cursor.get_mut().truncate(size);
        if self.cursor.position() > size as u64 {
            self.cursor.set_position(size as u64);
        }
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise<F: SeekableFile>(file: &mut F) {
        file.write_u32(7).unwrap();
        file.write_u64(1 << 40).unwrap();
        file.write_all(b"abc").unwrap();
        assert_eq!(file.size().unwrap(), 15);

        file.seek_to(0).unwrap();
        assert_eq!(file.read_u32().unwrap(), 7);
        assert_eq!(file.read_u64().unwrap(), 1 << 40);
        assert_eq!(file.read_bytes(3).unwrap(), b"abc".to_vec());
        assert_eq!(file.position().unwrap(), 15);

        file.truncate(4).unwrap();
        assert_eq!(file.size().unwrap(), 4);
        assert_eq!(file.position().unwrap(), 4);
    }

    #[test]
    fn memory_file_typed_io() {
        let mut file = MemoryFile::new();
        exercise(&mut file);
        assert_eq!(file.as_bytes(), &[0, 0, 0, 7]);
    }

    #[test]
    fn os_file_typed_io() {
        let dir = tempdir().unwrap();
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir.path().join("data.bin"))
            .unwrap();
        exercise(&mut file);
    }

    #[test]
    fn reading_past_end_fails() {
        let mut file = MemoryFile::from_bytes(vec![1, 2]);
        assert!(file.read_u32().is_err());
    }
}

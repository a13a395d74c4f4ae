//! # file
//!
//! why: keep snapshots on disk next to the entries of their generation
//! relations: implements snapshot::Snapshot and SnapshotBuilder, used by log/file.rs
//! what: `[header len][json header][data]` format, FileSnapshotWriter, FileSnapshot, StagedSnapshot, FileSnapshotBuilder

use super::{chunk_bounds, ChunkTracker, Snapshot, SnapshotBuilder, SnapshotChunk};
use crate::dir::LogDir;
use crate::entries_file::to_u32;
use crate::file::SeekableFile;
use raft_core::{InstallSnapshotRpc, LogError, Membership, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    last_index: u64,
    last_term: u64,
    last_config: Membership,
}

/// Writes the snapshot header, then passes state machine data through
pub struct FileSnapshotWriter<W: Write> {
    output: W,
}

impl<W: Write> FileSnapshotWriter<W> {
    pub fn new(
        mut output: W,
        last_included_index: u64,
        last_included_term: u64,
        last_config: &Membership,
    ) -> Result<Self> {
        let header = serde_json::to_vec(&SnapshotHeader {
            last_index: last_included_index,
            last_term: last_included_term,
            last_config: last_config.clone(),
        })?;
        output.write_all(&to_u32(header.len() as u64, "snapshot header length")?.to_be_bytes())?;
        output.write_all(&header)?;
        Ok(Self { output })
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write> Write for FileSnapshotWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
}

/// Snapshot read from a snapshot file
pub struct FileSnapshot<F: SeekableFile = File> {
    file: F,
    last_included_index: u64,
    last_included_term: u64,
    last_config: Membership,
    data_start: u64,
    data_length: u64,
}

impl FileSnapshot<File> {
    pub fn open(dir: &LogDir) -> Result<Self> {
        Self::from_file(File::open(dir.snapshot_file())?)
    }
}

impl<F: SeekableFile> FileSnapshot<F> {
    /// Parse the header of a snapshot store
    pub fn from_file(mut file: F) -> Result<Self> {
        let size = file.size()?;
        if size < 4 {
            return Err(LogError::Corrupted(format!(
                "snapshot file of {} bytes has no header",
                size
            )));
        }
        file.seek_to(0)?;
        let header_length = u64::from(file.read_u32()?);
        let data_start = 4 + header_length;
        if data_start > size {
            return Err(LogError::Corrupted(format!(
                "snapshot header of {} bytes exceeds file size {}",
                header_length, size
            )));
        }
        let header: SnapshotHeader = serde_json::from_slice(&file.read_bytes(header_length as usize)?)?;
        Ok(Self {
            file,
            last_included_index: header.last_index,
            last_included_term: header.last_term,
            last_config: header.last_config,
            data_start,
            data_length: size - data_start,
        })
    }
}

impl<F: SeekableFile> Snapshot for FileSnapshot<F> {
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
        self.data_length
    }

    fn read_data(&mut self, offset: u64, length: usize) -> Result<SnapshotChunk> {
        let (read, last_chunk) = chunk_bounds(offset, length, self.data_length)?;
        self.file.seek_to(self.data_start + offset)?;
        Ok(SnapshotChunk {
            data: self.file.read_bytes(read as usize)?,
            last_chunk,
        })
    }

    fn data_reader(&mut self) -> Result<Box<dyn Read + '_>> {
        self.file.seek_to(self.data_start)?;
        Ok(Box::new((&mut self.file).take(self.data_length)))
    }
}

/// A finished snapshot still sitting in its scratch directory
pub struct StagedSnapshot {
    dir: LogDir,
    snapshot: FileSnapshot<File>,
}

impl StagedSnapshot {
    pub fn open(dir: LogDir) -> Result<Self> {
        let snapshot = FileSnapshot::open(&dir)?;
        Ok(Self { dir, snapshot })
    }

    pub fn dir(&self) -> &LogDir {
        &self.dir
    }
}

impl Snapshot for StagedSnapshot {
    fn last_included_index(&self) -> u64 {
        self.snapshot.last_included_index()
    }

    fn last_included_term(&self) -> u64 {
        self.snapshot.last_included_term()
    }

    fn last_config(&self) -> &Membership {
        self.snapshot.last_config()
    }

    fn data_size(&self) -> u64 {
        self.snapshot.data_size()
    }

    fn read_data(&mut self, offset: u64, length: usize) -> Result<SnapshotChunk> {
        self.snapshot.read_data(offset, length)
    }

    fn data_reader(&mut self) -> Result<Box<dyn Read + '_>> {
        self.snapshot.data_reader()
    }
}

/// Streams InstallSnapshot chunks straight into a snapshot file
pub struct FileSnapshotBuilder {
    tracker: ChunkTracker,
    dir: LogDir,
    writer: FileSnapshotWriter<BufWriter<File>>,
}

impl FileSnapshotBuilder {
    /// Start a snapshot file in `dir` from the first chunk
    pub fn new(first: &InstallSnapshotRpc, dir: LogDir) -> Result<Self> {
        let tracker = ChunkTracker::start(first)?;
        let file = File::create(dir.snapshot_file())?;
        let mut writer = FileSnapshotWriter::new(
            BufWriter::new(file),
            tracker.last_included_index(),
            tracker.last_included_term(),
            tracker.last_config(),
        )?;
        writer.write_all(&first.data)?;
        debug!(
            target: "raft::snapshot",
            last_included_index = tracker.last_included_index(),
            dir = %dir.path().display(),
            "started snapshot file"
        );
        Ok(Self {
            tracker,
            dir,
            writer,
        })
    }
}

impl SnapshotBuilder for FileSnapshotBuilder {
    type Output = StagedSnapshot;

    fn append(&mut self, rpc: &InstallSnapshotRpc) -> Result<()> {
        self.tracker.accept(rpc)?;
        self.writer.write_all(&rpc.data)?;
        Ok(())
    }

    fn build(self) -> Result<StagedSnapshot> {
        let file = self
            .writer
            .into_inner()
            .into_inner()
            .map_err(|e| LogError::Io(e.into_error()))?;
        file.sync_all()?;
        StagedSnapshot::open(self.dir)
    }
}

//! # dir
//!
//! why: lay out the file-backed log on disk as generations named by their snapshot boundary
//! relations: used by log/file.rs for compaction, sequence/file.rs and snapshot/file.rs for file paths
//! what: LogDir, LogGeneration, RootDir with scratch directories and durable promotion

use raft_core::{LogError, Result};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const FILE_NAME_SNAPSHOT: &str = "snapshot.ss";
pub const FILE_NAME_ENTRIES: &str = "entries.bin";
pub const FILE_NAME_ENTRY_INDEX: &str = "entries.idx";
pub const FILE_NAME_NODE_STORE: &str = "node.bin";

const DIR_NAME_GENERATING: &str = "generating";
const DIR_NAME_INSTALLING: &str = "installing";
const GENERATION_PREFIX: &str = "log-";

/// A directory holding one snapshot file plus its entries and index files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDir {
    path: PathBuf,
}

impl LogDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_file(&self) -> PathBuf {
        self.path.join(FILE_NAME_SNAPSHOT)
    }

    pub fn entries_file(&self) -> PathBuf {
        self.path.join(FILE_NAME_ENTRIES)
    }

    pub fn entry_index_file(&self) -> PathBuf {
        self.path.join(FILE_NAME_ENTRY_INDEX)
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot_file().is_file()
    }

    /// Create the directory with empty entries and index files
    pub fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.path)?;
        for file in [self.entries_file(), self.entry_index_file()] {
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(file)?;
        }
        Ok(())
    }

    /// Flush every file in the directory and the directory entry list
    pub fn sync(&self) -> Result<()> {
        for file in [self.snapshot_file(), self.entries_file(), self.entry_index_file()] {
            if file.is_file() {
                File::open(&file)?.sync_all()?;
            }
        }
        sync_dir(&self.path)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if self.exists() {
            fs::remove_dir_all(&self.path)?;
        }
        Ok(())
    }
}

/// A promoted log directory named `log-<last included index>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGeneration {
    dir: LogDir,
    last_included_index: u64,
}

impl LogGeneration {
    fn at(base: &Path, last_included_index: u64) -> Self {
        Self {
            dir: LogDir::new(base.join(format!("{}{}", GENERATION_PREFIX, last_included_index))),
            last_included_index,
        }
    }

    /// Recognise a generation directory by its name
    pub fn parse(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let last_included_index = name.strip_prefix(GENERATION_PREFIX)?.parse().ok()?;
        Some(Self {
            dir: LogDir::new(path),
            last_included_index,
        })
    }

    pub fn last_included_index(&self) -> u64 {
        self.last_included_index
    }

    pub fn dir(&self) -> &LogDir {
        &self.dir
    }
}

/// Root directory of a file-backed log
#[derive(Debug, Clone)]
pub struct RootDir {
    base: PathBuf,
}

impl RootDir {
    /// Open (creating if needed) a root directory, discarding unfinished scratch directories
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base)?;
        let root = Self { base };
        for name in [DIR_NAME_GENERATING, DIR_NAME_INSTALLING] {
            let scratch = LogDir::new(root.base.join(name));
            if scratch.exists() {
                warn!(
                    target: "raft::snapshot",
                    dir = %scratch.path().display(),
                    "removing unfinished scratch directory"
                );
                scratch.remove()?;
            }
        }
        Ok(root)
    }

    pub fn path(&self) -> &Path {
        &self.base
    }

    pub fn node_store_file(&self) -> PathBuf {
        self.base.join(FILE_NAME_NODE_STORE)
    }

    /// Fresh scratch directory for a locally generated snapshot
    pub fn dir_for_generating(&self) -> Result<LogDir> {
        self.fresh_dir(DIR_NAME_GENERATING)
    }

    /// Fresh scratch directory for a snapshot received from the leader
    pub fn dir_for_installing(&self) -> Result<LogDir> {
        self.fresh_dir(DIR_NAME_INSTALLING)
    }

    fn fresh_dir(&self, name: &str) -> Result<LogDir> {
        let dir = LogDir::new(self.base.join(name));
        dir.remove()?;
        dir.initialize()?;
        Ok(dir)
    }

    pub fn create_first_generation(&self) -> Result<LogGeneration> {
        let generation = LogGeneration::at(&self.base, 0);
        generation.dir.initialize()?;
        sync_dir(&self.base)?;
        Ok(generation)
    }

    /// All generations, oldest first
    pub fn generations(&self) -> Result<Vec<LogGeneration>> {
        let mut generations = Vec::new();
        for dir_entry in fs::read_dir(&self.base)? {
            let path = dir_entry?.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(generation) = LogGeneration::parse(&path) {
                generations.push(generation);
            }
        }
        generations.sort_by_key(|g| g.last_included_index);
        Ok(generations)
    }

    pub fn latest_generation(&self) -> Result<Option<LogGeneration>> {
        Ok(self.generations()?.pop())
    }

    /// Durably turn a scratch directory into the generation for `last_included_index`
    pub fn promote(&self, dir: &LogDir, last_included_index: u64) -> Result<LogGeneration> {
        let generation = LogGeneration::at(&self.base, last_included_index);
        if generation.dir.exists() {
            return Err(LogError::IllegalState(format!(
                "generation directory {} already exists",
                generation.dir.path().display()
            )));
        }
        dir.sync()?;
        fs::rename(dir.path(), generation.dir.path())?;
        sync_dir(&self.base)?;
        info!(
            target: "raft::snapshot",
            from = %dir.path().display(),
            to = %generation.dir.path().display(),
            "promoted log directory"
        );
        Ok(generation)
    }

    /// Delete all but the newest `retained` generations
    pub fn prune(&self, retained: usize) -> Result<()> {
        let generations = self.generations()?;
        let excess = generations.len().saturating_sub(retained.max(1));
        for generation in &generations[..excess] {
            info!(
                target: "raft::snapshot",
                dir = %generation.dir.path().display(),
                "removing old generation"
            );
            generation.dir.remove()?;
        }
        if excess > 0 {
            sync_dir(&self.base)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
pub(crate) fn sync_dir(path: &Path) -> io::Result<()> {
    File::open(path)?.sync_all()
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

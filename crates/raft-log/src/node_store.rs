//! # node_store
//!
//! why: a node must never forget its term or its vote across restarts
//! relations: lives next to the log generations (RootDir::node_store_file), read by the node on startup
//! what: NodeStore trait, FileNodeStore with a fixed binary layout, MemoryNodeStore for testing

use crate::dir::sync_dir;
use crate::entries_file::to_u32;
use raft_core::{LogError, NodeId, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HEADER_SIZE: usize = 4 * 2;

/// durable term and vote of the local node
///
/// every setter is persisted before it returns, so a vote is never granted
/// twice in one term after a crash.
pub trait NodeStore {
    fn term(&self) -> u64;

    fn set_term(&mut self, term: u64) -> Result<()>;

    fn voted_for(&self) -> Option<&NodeId>;

    fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// file layout: `[term u32][voted_for len u32][voted_for utf-8 bytes]`
///
/// an empty vote is stored as length 0. every save replaces the whole file
/// through a synced temp file, so a crash leaves either the old or the new record.
pub struct FileNodeStore {
    path: PathBuf,
    term: u64,
    voted_for: Option<NodeId>,
}

impl FileNodeStore {
    /// open or create the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let temp = temp_path(&path);
        if temp.exists() {
            warn!(target: "raft::node_store", path = %temp.display(), "removing unfinished node store write");
            fs::remove_file(&temp)?;
        }

        if bytes.is_empty() {
            // fresh store: term 0, nobody voted for
            let mut store = Self {
                path,
                term: 0,
                voted_for: None,
            };
            store.save(0, None)?;
            return Ok(store);
        }

        let (term, voted_for) = decode(&bytes)?;
        debug!(target: "raft::node_store", term, ?voted_for, "loaded node store");
        Ok(Self {
            path,
            term,
            voted_for,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&mut self, term: u64, voted_for: Option<NodeId>) -> Result<()> {
        let bytes = encode(term, voted_for.as_ref())?;

        let temp = temp_path(&self.path);
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp, &self.path)?;
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => sync_dir(parent)?,
            _ => sync_dir(Path::new("."))?,
        }

        self.term = term;
        self.voted_for = voted_for;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn encode(term: u64, voted_for: Option<&NodeId>) -> Result<Vec<u8>> {
    let id = voted_for.map_or(&[][..], |id| id.as_str().as_bytes());
    let mut bytes = Vec::with_capacity(HEADER_SIZE + id.len());
    bytes.extend_from_slice(&to_u32(term, "term")?.to_be_bytes());
    bytes.extend_from_slice(&to_u32(id.len() as u64, "voted_for length")?.to_be_bytes());
    bytes.extend_from_slice(id);
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> Result<(u64, Option<NodeId>)> {
    let header = bytes.get(..HEADER_SIZE).ok_or_else(|| {
        LogError::Corrupted(format!("node store of {} bytes has no header", bytes.len()))
    })?;
    let term = u64::from(u32::from_be_bytes([header[0], header[1], header[2], header[3]]));
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let id = bytes.get(HEADER_SIZE..HEADER_SIZE + length).ok_or_else(|| {
        LogError::Corrupted(format!(
            "node store of {} bytes is shorter than its {} byte vote",
            bytes.len(),
            length
        ))
    })?;
    if length == 0 {
        return Ok((term, None));
    }
    let id = String::from_utf8(id.to_vec())
        .map_err(|e| LogError::Corrupted(format!("voted_for is not utf-8: {}", e)))?;
    Ok((term, Some(NodeId::new(id))))
}

impl NodeStore for FileNodeStore {
    fn term(&self) -> u64 {
        self.term
    }

    fn set_term(&mut self, term: u64) -> Result<()> {
        let voted_for = self.voted_for.clone();
        self.save(term, voted_for)
    }

    fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()> {
        self.save(self.term, voted_for)
    }
}

/// in-memory node store for testing
///
/// nothing survives a restart
#[derive(Debug, Default, Clone)]
pub struct MemoryNodeStore {
    term: u64,
    voted_for: Option<NodeId>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeStore for MemoryNodeStore {
    fn term(&self) -> u64 {
        self.term
    }

    fn set_term(&mut self, term: u64) -> Result<()> {
        self.term = term;
        Ok(())
    }

    fn voted_for(&self) -> Option<&NodeId> {
        self.voted_for.as_ref()
    }

    fn set_voted_for(&mut self, voted_for: Option<NodeId>) -> Result<()> {
        self.voted_for = voted_for;
        Ok(())
    }
}

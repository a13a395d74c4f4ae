//! # raft-log
//!
//! why: keep the replicated log of a raft node consistent with its leader, compacted and durable
//! relations: builds on raft-core types; a node drives it with rpcs and commit decisions
//! what: Log facade over memory or file storage, entry sequences, snapshots, state machine plumbing, node store
//!
//! the file layout under a root directory is:
//! - `node.bin`: term and vote of the local node
//! - `log-<index>/`: one generation, a snapshot ending at `index` plus the entries after it
//! - `generating/`, `installing/`: scratch directories for snapshots in progress

pub mod dir;
pub mod entries_file;
pub mod event;
pub mod file;
pub mod group_config;
pub mod index_file;
pub mod log;
pub mod node_store;
pub mod sequence;
pub mod snapshot;
pub mod state_machine;

pub use dir::{LogDir, LogGeneration, RootDir};
pub use event::{EventQueue, LogEvent, LogListener, NoopListener};
pub use file::{MemoryFile, SeekableFile};
pub use group_config::GroupConfigEntryList;
pub use log::{FileLog, FileStorage, InstallSnapshotState, Log, LogStorage, MemoryLog, MemoryStorage};
pub use node_store::{FileNodeStore, MemoryNodeStore, NodeStore};
pub use sequence::{EntrySequence, FileEntrySequence, MemoryEntrySequence};
pub use snapshot::{
    EmptySnapshot, FileSnapshot, FileSnapshotBuilder, MemorySnapshot, MemorySnapshotBuilder,
    Snapshot, SnapshotBuilder, SnapshotChunk,
};
pub use state_machine::{
    ApplyHandler, EmptyStateMachine, SingleThreadStateMachine, StateMachine, StateMachineContext,
};

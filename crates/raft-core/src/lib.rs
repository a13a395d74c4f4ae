//! # raft-core
//!
//! why: share the plain data types of the replicated log between the engine and its collaborators
//! relations: used by raft-log for storage and replication, by role/transport layers for rpc handling
//! what: node identities, log entries, rpc messages, configuration, error taxonomy

pub mod config;
pub mod entry;
pub mod error;
pub mod message;
pub mod node;

pub use config::LogConfig;
pub use entry::{AddNodeCommand, Entry, EntryKind, EntryMeta, EntryPayload, RemoveNodeCommand};
pub use error::{LogError, Result};
pub use message::{AppendEntriesRpc, InstallSnapshotRpc};
pub use node::{Membership, NodeEndpoint, NodeId};

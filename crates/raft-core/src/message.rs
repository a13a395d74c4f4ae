//! # message
//!
//! why: define the replication rpcs the log builds and consumes
//! relations: created and accepted by raft-log's Log, encoded by the transport layer
//! what: AppendEntriesRpc, InstallSnapshotRpc

use crate::entry::Entry;
use crate::node::{Membership, NodeId};
use serde::{Deserialize, Serialize};

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRpc {
    pub term: u64,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    pub entries: Vec<Entry>,
    pub leader_commit: u64,
}

impl AppendEntriesRpc {
    /// Index of the last entry carried, or `prev_log_index` for a heartbeat
    pub fn last_entry_index(&self) -> u64 {
        self.entries
            .last()
            .map(|e| e.index)
            .unwrap_or(self.prev_log_index)
    }
}

/// One chunk of a snapshot streamed from the leader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotRpc {
    pub term: u64,
    pub leader_id: NodeId,
    pub last_index: u64,
    pub last_term: u64,
    /// Only populated on the first chunk
    pub last_config: Membership,
    pub offset: u64,
    pub data: Vec<u8>,
    pub done: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_reports_prev_log_index() {
        let rpc = AppendEntriesRpc {
            term: 2,
            leader_id: NodeId::new("A"),
            prev_log_index: 5,
            prev_log_term: 1,
            entries: Vec::new(),
            leader_commit: 4,
        };
        assert_eq!(rpc.last_entry_index(), 5);
    }

    #[test]
    fn last_entry_index_uses_final_entry() {
        let rpc = AppendEntriesRpc {
            term: 2,
            leader_id: NodeId::new("A"),
            prev_log_index: 1,
            prev_log_term: 1,
            entries: vec![Entry::no_op(2, 2), Entry::general(3, 2, b"x".to_vec())],
            leader_commit: 1,
        };
        assert_eq!(rpc.last_entry_index(), 3);
    }
}

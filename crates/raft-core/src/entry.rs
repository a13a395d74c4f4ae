//! # entry
//!
//! why: model the units of replicated state stored in the log
//! relations: persisted by raft-log entry files, carried by message.rs rpcs
//! what: EntryKind tags, Entry with its closed payload union, EntryMeta, membership commands

use crate::error::{LogError, Result};
use crate::node::{Membership, NodeEndpoint, NodeId};
use serde::{Deserialize, Serialize};

/// Integer tag identifying the payload of an entry on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    NoOp,
    General,
    AddNode,
    RemoveNode,
}

impl EntryKind {
    pub fn as_u32(self) -> u32 {
        match self {
            EntryKind::NoOp => 0,
            EntryKind::General => 1,
            EntryKind::AddNode => 3,
            EntryKind::RemoveNode => 4,
        }
    }

    pub fn from_u32(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(EntryKind::NoOp),
            1 => Ok(EntryKind::General),
            3 => Ok(EntryKind::AddNode),
            4 => Ok(EntryKind::RemoveNode),
            other => Err(LogError::Corrupted(format!("unknown entry kind {}", other))),
        }
    }

    /// AddNode and RemoveNode entries change cluster membership
    pub fn is_group_config(self) -> bool {
        matches!(self, EntryKind::AddNode | EntryKind::RemoveNode)
    }
}

/// Membership change adding one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNodeCommand {
    pub node_endpoints: Membership,
    pub new_node_endpoint: NodeEndpoint,
}

/// Membership change removing one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveNodeCommand {
    pub node_endpoints: Membership,
    pub node_to_remove: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Appended by a new leader to commit entries of previous terms
    NoOp,
    /// Opaque command for the state machine
    General(Vec<u8>),
    AddNode(AddNodeCommand),
    RemoveNode(RemoveNodeCommand),
}

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The term of the leader that created this entry
    pub term: u64,
    pub payload: EntryPayload,
}

impl Entry {
    pub fn new(index: u64, term: u64, payload: EntryPayload) -> Self {
        Self {
            index,
            term,
            payload,
        }
    }

    pub fn no_op(index: u64, term: u64) -> Self {
        Self::new(index, term, EntryPayload::NoOp)
    }

    pub fn general(index: u64, term: u64, command: impl Into<Vec<u8>>) -> Self {
        Self::new(index, term, EntryPayload::General(command.into()))
    }

    pub fn add_node(
        index: u64,
        term: u64,
        node_endpoints: Membership,
        new_node_endpoint: NodeEndpoint,
    ) -> Self {
        Self::new(
            index,
            term,
            EntryPayload::AddNode(AddNodeCommand {
                node_endpoints,
                new_node_endpoint,
            }),
        )
    }

    pub fn remove_node(
        index: u64,
        term: u64,
        node_endpoints: Membership,
        node_to_remove: NodeId,
    ) -> Self {
        Self::new(
            index,
            term,
            EntryPayload::RemoveNode(RemoveNodeCommand {
                node_endpoints,
                node_to_remove,
            }),
        )
    }

    pub fn kind(&self) -> EntryKind {
        match self.payload {
            EntryPayload::NoOp => EntryKind::NoOp,
            EntryPayload::General(_) => EntryKind::General,
            EntryPayload::AddNode(_) => EntryKind::AddNode,
            EntryPayload::RemoveNode(_) => EntryKind::RemoveNode,
        }
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta::new(self.kind(), self.index, self.term)
    }

    /// Only general entries are fed to the state machine
    pub fn is_applicable(&self) -> bool {
        matches!(self.payload, EntryPayload::General(_))
    }

    pub fn is_group_config(&self) -> bool {
        self.kind().is_group_config()
    }

    /// Membership before the change, for group config entries
    pub fn node_endpoints(&self) -> Option<&Membership> {
        match &self.payload {
            EntryPayload::AddNode(cmd) => Some(&cmd.node_endpoints),
            EntryPayload::RemoveNode(cmd) => Some(&cmd.node_endpoints),
            _ => None,
        }
    }

    /// Membership after the change, for group config entries
    pub fn result_node_endpoints(&self) -> Option<Membership> {
        match &self.payload {
            EntryPayload::AddNode(cmd) => {
                let mut result = cmd.node_endpoints.clone();
                result.insert(cmd.new_node_endpoint.clone());
                Some(result)
            }
            EntryPayload::RemoveNode(cmd) => Some(
                cmd.node_endpoints
                    .iter()
                    .filter(|e| e.id != cmd.node_to_remove)
                    .cloned()
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Serialized payload as stored in the entries file
    pub fn command_bytes(&self) -> Result<Vec<u8>> {
        Ok(match &self.payload {
            EntryPayload::NoOp => Vec::new(),
            EntryPayload::General(command) => command.clone(),
            EntryPayload::AddNode(cmd) => serde_json::to_vec(cmd)?,
            EntryPayload::RemoveNode(cmd) => serde_json::to_vec(cmd)?,
        })
    }

    /// Rebuild an entry from its stored kind tag, position and payload
    pub fn from_parts(kind: EntryKind, index: u64, term: u64, command: Vec<u8>) -> Result<Self> {
        let payload = match kind {
            EntryKind::NoOp => EntryPayload::NoOp,
            EntryKind::General => EntryPayload::General(command),
            EntryKind::AddNode => EntryPayload::AddNode(serde_json::from_slice(&command)?),
            EntryKind::RemoveNode => EntryPayload::RemoveNode(serde_json::from_slice(&command)?),
        };
        Ok(Self::new(index, term, payload))
    }
}

/// Kind, index and term of an entry without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub kind: EntryKind,
    pub index: u64,
    pub term: u64,
}

impl EntryMeta {
    pub fn new(kind: EntryKind, index: u64, term: u64) -> Self {
        Self { kind, index, term }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Membership {
        [
            NodeEndpoint::new("A", "localhost", 2333),
            NodeEndpoint::new("B", "localhost", 2334),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(EntryKind::NoOp.as_u32(), 0);
        assert_eq!(EntryKind::General.as_u32(), 1);
        assert_eq!(EntryKind::AddNode.as_u32(), 3);
        assert_eq!(EntryKind::RemoveNode.as_u32(), 4);
        assert!(EntryKind::from_u32(2).is_err());
    }

    #[test]
    fn add_node_result_contains_new_endpoint() {
        let entry = Entry::add_node(1, 1, endpoints(), NodeEndpoint::new("C", "localhost", 2335));
        let result = entry.result_node_endpoints().unwrap();
        assert_eq!(result.len(), 3);
        assert!(result.iter().any(|e| e.id.as_str() == "C"));
        assert_eq!(entry.node_endpoints().unwrap().len(), 2);
    }

    #[test]
    fn remove_node_result_drops_target() {
        let entry = Entry::remove_node(1, 1, endpoints(), NodeId::new("B"));
        let result = entry.result_node_endpoints().unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.iter().all(|e| e.id.as_str() != "B"));
    }

    #[test]
    fn only_general_entries_are_applicable() {
        assert!(Entry::general(1, 1, b"x".to_vec()).is_applicable());
        assert!(!Entry::no_op(1, 1).is_applicable());
        assert!(!Entry::remove_node(1, 1, endpoints(), NodeId::new("A")).is_applicable());
    }

    #[test]
    fn group_config_payload_survives_encoding() {
        let entry = Entry::add_node(4, 2, endpoints(), NodeEndpoint::new("C", "localhost", 2335));
        let bytes = entry.command_bytes().unwrap();
        let decoded = Entry::from_parts(EntryKind::AddNode, 4, 2, bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn no_op_has_empty_payload() {
        assert!(Entry::no_op(1, 1).command_bytes().unwrap().is_empty());
    }
}

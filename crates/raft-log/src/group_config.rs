//! # group_config
//!
//! why: answer membership questions without rescanning the log
//! relations: built by sequence implementations, maintained by log/mod.rs
//! what: GroupConfigEntryList of AddNode/RemoveNode entries in index order

use raft_core::Entry;

/// Membership-change entries known to the log, ordered by index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupConfigEntryList {
    entries: Vec<Entry>,
}

impl GroupConfigEntryList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a membership change; other kinds are ignored
    pub fn add(&mut self, entry: Entry) {
        if entry.is_group_config() {
            self.entries.push(entry);
        }
    }

    pub fn last(&self) -> Option<&Entry> {
        self.entries.last()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Entry> {
        self.entries.iter()
    }

    /// Entries with index in `[from_index, to_index)`
    pub fn sub_list(&self, from_index: u64, to_index: u64) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| e.index >= from_index && e.index < to_index)
            .cloned()
            .collect()
    }

    /// Drop entries after `index` and return the first one dropped
    pub fn remove_after(&mut self, index: u64) -> Option<Entry> {
        let position = self.entries.iter().position(|e| e.index > index)?;
        self.entries.split_off(position).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raft_core::{Membership, NodeEndpoint, NodeId};

    fn endpoints() -> Membership {
        [NodeEndpoint::new("A", "localhost", 2333)].into_iter().collect()
    }

    fn list() -> GroupConfigEntryList {
        let mut list = GroupConfigEntryList::new();
        list.add(Entry::add_node(2, 1, endpoints(), NodeEndpoint::new("B", "localhost", 2334)));
        list.add(Entry::general(3, 1, b"ignored".to_vec()));
        list.add(Entry::remove_node(5, 1, endpoints(), NodeId::new("A")));
        list.add(Entry::add_node(7, 2, endpoints(), NodeEndpoint::new("C", "localhost", 2335)));
        list
    }

    #[test]
    fn only_membership_changes_are_kept() {
        let list = list();
        assert_eq!(list.len(), 3);
        assert_eq!(list.last().unwrap().index, 7);
    }

    #[test]
    fn sub_list_is_half_open() {
        let indices: Vec<u64> = list().sub_list(2, 7).iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![2, 5]);
    }

    #[test]
    fn remove_after_returns_first_removed() {
        let mut list = list();
        let removed = list.remove_after(3).unwrap();
        assert_eq!(removed.index, 5);
        assert_eq!(list.len(), 1);
        assert!(list.remove_after(3).is_none());
    }
}

//! # event
//!
//! why: tell the node layer about membership changes and compaction needs without a global bus
//! relations: called synchronously by log/mod.rs, implemented by the node layer
//! what: LogListener observer, NoopListener, LogEvent and the recording EventQueue

use raft_core::Entry;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Observer of side effects produced by the log
///
/// Every method is invoked on the thread that mutates the log.
pub trait LogListener {
    /// A membership change arrived from the leader and was appended
    fn on_group_config_appended(&mut self, _entry: &Entry) {}

    /// A membership change became committed
    fn on_group_config_committed(&mut self, _entry: &Entry) {}

    /// Truncation removed membership changes, starting with `first_removed`
    fn on_group_config_removed(&mut self, _first_removed: &Entry) {}

    /// The state machine asked for a snapshot up to `last_included_index`
    fn on_snapshot_generation_requested(&mut self, _last_included_index: u64) {}
}

/// Listener that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl LogListener for NoopListener {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    GroupConfigAppended(Entry),
    GroupConfigCommitted(Entry),
    GroupConfigRemoved(Entry),
    SnapshotGenerationRequested(u64),
}

/// Listener recording events for the node layer to drain after each call
///
/// Clones share the same queue, so one clone can be handed to the log.
#[derive(Debug, Default, Clone)]
pub struct EventQueue {
    events: Rc<RefCell<VecDeque<LogEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every event recorded so far, oldest first
    pub fn drain(&self) -> Vec<LogEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    fn push(&self, event: LogEvent) {
        self.events.borrow_mut().push_back(event);
    }
}

impl LogListener for EventQueue {
    fn on_group_config_appended(&mut self, entry: &Entry) {
        self.push(LogEvent::GroupConfigAppended(entry.clone()));
    }

    fn on_group_config_committed(&mut self, entry: &Entry) {
        self.push(LogEvent::GroupConfigCommitted(entry.clone()));
    }

    fn on_group_config_removed(&mut self, first_removed: &Entry) {
        self.push(LogEvent::GroupConfigRemoved(first_removed.clone()));
    }

    fn on_snapshot_generation_requested(&mut self, last_included_index: u64) {
        self.push(LogEvent::SnapshotGenerationRequested(last_included_index));
    }
}

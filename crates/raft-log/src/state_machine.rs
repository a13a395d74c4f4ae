//! # state_machine
//!
//! why: feed committed commands to the application in strict index order
//! relations: driven by log/mod.rs apply pipeline, restored from and dumped into snapshot/
//! what: StateMachine trait, StateMachineContext, EmptyStateMachine, SingleThreadStateMachine worker

use crate::snapshot::Snapshot;
use raft_core::{LogError, Result};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Callbacks a state machine may use while applying
pub trait StateMachineContext {
    /// Ask the node to compact the log up to `last_included_index`
    fn generate_snapshot(&mut self, last_included_index: u64);
}

/// Application state built from committed entries
pub trait StateMachine {
    /// Index of the most recently applied entry; never decreases except through a snapshot
    fn last_applied(&self) -> u64;

    /// Apply the command of the general entry at `index`
    fn apply_log(
        &mut self,
        context: &mut dyn StateMachineContext,
        index: u64,
        command: &[u8],
        first_log_index: u64,
    ) -> Result<()>;

    /// Skip over a non-command entry at `index`
    fn advance_last_applied(&mut self, index: u64) -> Result<()>;

    /// Replace the whole state with the snapshot data
    fn apply_snapshot(&mut self, snapshot: &mut dyn Snapshot) -> Result<()>;

    /// Serialize the whole state into `output`
    fn generate_snapshot(&mut self, output: &mut dyn Write) -> Result<()>;

    /// Block until every submitted entry is reflected in `last_applied`
    fn sync_applied(&mut self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// State machine without state, only tracking `last_applied`
#[derive(Debug, Default, Clone)]
pub struct EmptyStateMachine {
    last_applied: u64,
}

impl EmptyStateMachine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateMachine for EmptyStateMachine {
    fn last_applied(&self) -> u64 {
        self.last_applied
    }

    fn apply_log(
        &mut self,
        _context: &mut dyn StateMachineContext,
        index: u64,
        _command: &[u8],
        _first_log_index: u64,
    ) -> Result<()> {
        self.last_applied = index;
        Ok(())
    }

    fn advance_last_applied(&mut self, index: u64) -> Result<()> {
        self.last_applied = self.last_applied.max(index);
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: &mut dyn Snapshot) -> Result<()> {
        self.last_applied = snapshot.last_included_index();
        Ok(())
    }

    fn generate_snapshot(&mut self, _output: &mut dyn Write) -> Result<()> {
        Ok(())
    }
}

/// Application logic run by a [`SingleThreadStateMachine`] worker
pub trait ApplyHandler: Send + 'static {
    fn apply_command(&mut self, index: u64, command: &[u8]) -> Result<()>;

    /// Replace the state with serialized snapshot data
    fn restore(&mut self, data: Vec<u8>) -> Result<()>;

    /// Serialize the state
    fn dump(&mut self) -> Result<Vec<u8>>;

    /// Whether growth since `first_log_index` warrants compacting up to `last_applied`
    fn should_generate_snapshot(&self, _first_log_index: u64, _last_applied: u64) -> bool {
        false
    }
}

enum Task {
    Apply {
        index: u64,
        command: Vec<u8>,
        first_log_index: u64,
    },
    Advance(u64),
    Restore {
        last_included_index: u64,
        data: Vec<u8>,
        reply: Sender<Result<()>>,
    },
    Dump {
        reply: Sender<Result<Vec<u8>>>,
    },
    Barrier(Sender<()>),
}

/// Applies commands on a dedicated worker thread
///
/// `apply_log` only enqueues work, so `last_applied` may lag behind what the
/// log thread submitted; duplicate submissions are skipped by the worker.
/// Snapshot restore and dump wait for the worker to finish queued work.
pub struct SingleThreadStateMachine {
    tasks: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
    last_applied: Arc<AtomicU64>,
    snapshot_requests: Receiver<u64>,
}

impl SingleThreadStateMachine {
    pub fn spawn<H: ApplyHandler>(handler: H) -> Result<Self> {
        let (tasks, task_rx) = mpsc::channel();
        let (request_tx, snapshot_requests) = mpsc::channel();
        let last_applied = Arc::new(AtomicU64::new(0));
        let worker_applied = Arc::clone(&last_applied);
        let worker = thread::Builder::new()
            .name("state-machine".into())
            .spawn(move || run_worker(handler, task_rx, worker_applied, request_tx))?;
        Ok(Self {
            tasks: Some(tasks),
            worker: Some(worker),
            last_applied,
            snapshot_requests,
        })
    }

    fn submit(&self, task: Task) -> Result<()> {
        self.tasks
            .as_ref()
            .ok_or_else(worker_stopped)?
            .send(task)
            .map_err(|_| worker_stopped())
    }
}

fn worker_stopped() -> LogError {
    LogError::IllegalState("state machine worker stopped".into())
}

fn run_worker<H: ApplyHandler>(
    mut handler: H,
    tasks: Receiver<Task>,
    last_applied: Arc<AtomicU64>,
    snapshot_requests: Sender<u64>,
) {
    while let Ok(task) = tasks.recv() {
        match task {
            Task::Apply {
                index,
                command,
                first_log_index,
            } => {
                if index <= last_applied.load(Ordering::Acquire) {
                    continue;
                }
                if let Err(e) = handler.apply_command(index, &command) {
                    error!(
                        target: "raft::state_machine",
                        index,
                        error = %e,
                        "failed to apply log, stopping worker"
                    );
                    return;
                }
                last_applied.store(index, Ordering::Release);
                if handler.should_generate_snapshot(first_log_index, index) {
                    let _ = snapshot_requests.send(index);
                }
            }
            Task::Advance(index) => {
                if index > last_applied.load(Ordering::Acquire) {
                    last_applied.store(index, Ordering::Release);
                }
            }
            Task::Restore {
                last_included_index,
                data,
                reply,
            } => {
                let result = handler.restore(data);
                if result.is_ok() {
                    last_applied.store(last_included_index, Ordering::Release);
                }
                let _ = reply.send(result);
            }
            Task::Dump { reply } => {
                let _ = reply.send(handler.dump());
            }
            Task::Barrier(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!(target: "raft::state_machine", "worker exited");
}

impl StateMachine for SingleThreadStateMachine {
    fn last_applied(&self) -> u64 {
        self.last_applied.load(Ordering::Acquire)
    }

    fn apply_log(
        &mut self,
        context: &mut dyn StateMachineContext,
        index: u64,
        command: &[u8],
        first_log_index: u64,
    ) -> Result<()> {
        for requested in self.snapshot_requests.try_iter() {
            context.generate_snapshot(requested);
        }
        self.submit(Task::Apply {
            index,
            command: command.to_vec(),
            first_log_index,
        })
    }

    fn advance_last_applied(&mut self, index: u64) -> Result<()> {
        self.submit(Task::Advance(index))
    }

    fn apply_snapshot(&mut self, snapshot: &mut dyn Snapshot) -> Result<()> {
        let last_included_index = snapshot.last_included_index();
        let mut data = Vec::new();
        snapshot.data_reader()?.read_to_end(&mut data)?;
        let (reply, response) = mpsc::channel();
        self.submit(Task::Restore {
            last_included_index,
            data,
            reply,
        })?;
        response.recv().map_err(|_| worker_stopped())?
    }

    fn generate_snapshot(&mut self, output: &mut dyn Write) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.submit(Task::Dump { reply })?;
        let data = response.recv().map_err(|_| worker_stopped())??;
        output.write_all(&data)?;
        Ok(())
    }

    fn sync_applied(&mut self) -> Result<()> {
        let (reply, response) = mpsc::channel();
        self.submit(Task::Barrier(reply))?;
        response.recv().map_err(|_| worker_stopped())
    }

    fn shutdown(&mut self) -> Result<()> {
        drop(self.tasks.take());
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| LogError::IllegalState("state machine worker panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for SingleThreadStateMachine {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshot;
    use raft_core::Membership;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        applied: Arc<Mutex<Vec<u64>>>,
        snapshot_every: u64,
    }

    impl ApplyHandler for Recorder {
        fn apply_command(&mut self, index: u64, _command: &[u8]) -> Result<()> {
            self.applied.lock().unwrap().push(index);
            Ok(())
        }

        fn restore(&mut self, data: Vec<u8>) -> Result<()> {
            let mut applied = self.applied.lock().unwrap();
            applied.clear();
            applied.extend(data.iter().map(|b| u64::from(*b)));
            Ok(())
        }

        fn dump(&mut self) -> Result<Vec<u8>> {
            Ok(self.applied.lock().unwrap().iter().map(|i| *i as u8).collect())
        }

        fn should_generate_snapshot(&self, first_log_index: u64, last_applied: u64) -> bool {
            self.snapshot_every > 0 && last_applied - first_log_index + 1 >= self.snapshot_every
        }
    }

    #[derive(Default)]
    struct Requests(Vec<u64>);

    impl StateMachineContext for Requests {
        fn generate_snapshot(&mut self, last_included_index: u64) {
            self.0.push(last_included_index);
        }
    }

    #[test]
    fn empty_state_machine_tracks_last_applied() {
        let mut machine = EmptyStateMachine::new();
        machine.apply_log(&mut Requests::default(), 1, b"x", 1).unwrap();
        machine.advance_last_applied(2).unwrap();
        assert_eq!(machine.last_applied(), 2);

        let mut snapshot = MemorySnapshot::new(9, 1, Membership::new(), Vec::new());
        machine.apply_snapshot(&mut snapshot).unwrap();
        assert_eq!(machine.last_applied(), 9);
    }

    #[test]
    fn worker_applies_in_order_and_skips_duplicates() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let mut machine = SingleThreadStateMachine::spawn(Recorder {
            applied: Arc::clone(&applied),
            snapshot_every: 0,
        })
        .unwrap();
        let mut context = Requests::default();
        for index in [1, 2, 2, 3] {
            machine.apply_log(&mut context, index, b"cmd", 1).unwrap();
        }
        machine.advance_last_applied(4).unwrap();
        machine.shutdown().unwrap();

        assert_eq!(*applied.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(machine.last_applied(), 4);
    }

    #[test]
    fn snapshot_restore_and_dump_are_synchronous() {
        let mut machine = SingleThreadStateMachine::spawn(Recorder::default()).unwrap();
        let mut snapshot = MemorySnapshot::new(6, 2, Membership::new(), vec![4, 5, 6]);
        machine.apply_snapshot(&mut snapshot).unwrap();
        assert_eq!(machine.last_applied(), 6);

        machine.apply_log(&mut Requests::default(), 7, b"cmd", 1).unwrap();
        let mut output: Vec<u8> = Vec::new();
        machine.generate_snapshot(&mut output).unwrap();
        assert_eq!(output, vec![4, 5, 6, 7]);
    }

    #[test]
    fn snapshot_requests_reach_the_context() {
        let mut machine = SingleThreadStateMachine::spawn(Recorder {
            applied: Arc::default(),
            snapshot_every: 2,
        })
        .unwrap();
        let mut context = Requests::default();
        machine.apply_log(&mut context, 1, b"a", 1).unwrap();
        machine.apply_log(&mut context, 2, b"b", 1).unwrap();
        // a dump waits for queued applies, so the request is pending afterwards
        machine.generate_snapshot(&mut Vec::<u8>::new()).unwrap();
        machine.apply_log(&mut context, 3, b"c", 1).unwrap();
        assert_eq!(context.0, vec![2]);
    }

    #[test]
    fn sync_applied_waits_for_queued_work() {
        let mut machine = SingleThreadStateMachine::spawn(Recorder::default()).unwrap();
        let mut context = Requests::default();
        for index in 1..=50 {
            machine.apply_log(&mut context, index, b"cmd", 1).unwrap();
        }
        machine.sync_applied().unwrap();
        assert_eq!(machine.last_applied(), 50);
    }

    #[test]
    fn calls_after_shutdown_fail() {
        let mut machine = SingleThreadStateMachine::spawn(Recorder::default()).unwrap();
        machine.shutdown().unwrap();
        assert!(machine
            .apply_log(&mut Requests::default(), 1, b"x", 1)
            .is_err());
    }
}

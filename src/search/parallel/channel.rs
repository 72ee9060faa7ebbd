//! Messages and channels between the pool and its workers.

use crate::search::definition::{Task, TaskId};
use crate::search::parallel::backend::Backend;
use crate::search::result::Batch;
use crate::search::searcher::TaskOutcome;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Command sent from the pool to one worker.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Drive this task to completion or cancellation.
    Run(Task),
    /// Leave the worker loop and let the thread exit.
    Shutdown,
}

/// Event sent from a worker to the pool.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Worker context is up and waiting for tasks.
    Ready { worker_id: usize, backend: Backend },
    /// Worker context could not be created; the thread is exiting.
    InitFailed { worker_id: usize, reason: String },
    /// A searcher step produced a batch.
    Batch {
        worker_id: usize,
        task_id: TaskId,
        batch: Batch,
    },
    /// The task left the running state.
    Finished {
        worker_id: usize,
        task_id: TaskId,
        outcome: TaskOutcome,
    },
}

/// Cooperative cancellation signal shared by the pool and every worker.
///
/// Workers check it once per iteration, before each step, and searchers
/// receive it in every `step` call.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the signal so the next execution starts fresh.
    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Channel endpoints for a worker.
pub struct WorkerChannels {
    /// Receive commands from the pool.
    pub commands: Receiver<WorkerCommand>,
    /// Send events to the pool.
    pub events: Sender<WorkerEvent>,
    /// Shared cancellation signal.
    pub token: CancellationToken,
}

/// Shared event channel from all workers to the pool.
///
/// Bounded so that workers block once the orchestrator falls
/// `capacity` events behind.
pub fn event_channel(capacity: usize) -> (Sender<WorkerEvent>, Receiver<WorkerEvent>) {
    bounded(capacity.max(1))
}

/// Per-worker command channel. One slot: a worker holds at most one task.
pub fn command_channel() -> (Sender<WorkerCommand>, Receiver<WorkerCommand>) {
    bounded(1)
}

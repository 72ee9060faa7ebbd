//! Worker threads hosting one searcher at a time.
//!
//! Each worker:
//! - Prepares its computation context once, then reports `Ready`
//! - Waits on its single-slot command channel for a task
//! - Drives the task's searcher, streaming every batch to the pool
//! - Reports `Finished` and goes back to waiting

use crate::error::WorkerInitError;
use crate::search::definition::{Task, TaskId};
use crate::search::parallel::backend::Backend;
use crate::search::parallel::channel::{
    CancellationToken, WorkerChannels, WorkerCommand, WorkerEvent, command_channel,
};
use crate::search::searcher::{Driver, SearcherFactory, TaskOutcome, TaskStats, TaskStatus};
use crossbeam_channel::{SendError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

/// Pool-side view of a worker's occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
    Terminating,
}

/// Pool-owned handle to one worker thread
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    backend: Backend,
    state: WorkerState,
    current_task: Option<TaskId>,
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker thread. The thread reports `Ready` or `InitFailed`
    /// on `events` once its context is prepared.
    pub fn spawn(
        id: usize,
        backend: Backend,
        chunk_size: u64,
        stall_limit: Option<u64>,
        factory: Arc<dyn SearcherFactory>,
        events: Sender<WorkerEvent>,
        token: CancellationToken,
    ) -> Result<Self, WorkerInitError> {
        let (commands, command_rx) = command_channel();
        let channels = WorkerChannels {
            commands: command_rx,
            events,
            token,
        };

        let thread = thread::Builder::new()
            .name(format!("search-{}-{}", backend, id))
            .spawn(move || worker_loop(id, backend, chunk_size, stall_limit, factory, channels))
            .map_err(|e| WorkerInitError {
                worker_id: id,
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            backend,
            state: WorkerState::Idle,
            current_task: None,
            commands,
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    pub fn is_idle(&self) -> bool {
        self.state == WorkerState::Idle
    }

    /// True when the thread has exited, for whatever reason.
    pub fn has_exited(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Hand a task to an idle worker. On failure the task is given back.
    pub fn assign(&mut self, task: Task) -> Result<(), Task> {
        debug_assert!(self.is_idle(), "worker {} is not idle", self.id);
        let task_id = task.id;
        match self.commands.send(WorkerCommand::Run(task)) {
            Ok(()) => {
                self.state = WorkerState::Busy;
                self.current_task = Some(task_id);
                Ok(())
            }
            Err(SendError(WorkerCommand::Run(task))) => Err(task),
            Err(SendError(WorkerCommand::Shutdown)) => unreachable!("sent a Run command"),
        }
    }

    /// Mark the worker idle after its task finished.
    pub fn release(&mut self) -> Option<TaskId> {
        self.state = WorkerState::Idle;
        self.current_task.take()
    }

    /// Ask the thread to exit. Does not wait.
    pub fn request_shutdown(&mut self) {
        self.state = WorkerState::Terminating;
        let _ = self.commands.try_send(WorkerCommand::Shutdown);
    }

    /// Wait for the thread to exit.
    pub fn join(mut self) -> bool {
        match self.thread.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

/// Main worker loop
fn worker_loop(
    id: usize,
    backend: Backend,
    chunk_size: u64,
    stall_limit: Option<u64>,
    factory: Arc<dyn SearcherFactory>,
    channels: WorkerChannels,
) {
    if let Err(reason) = factory.init_context(id, backend) {
        warn!(worker = id, %backend, reason = %reason, "Worker context failed to initialize");
        let _ = channels
            .events
            .send(WorkerEvent::InitFailed { worker_id: id, reason });
        return;
    }

    if channels
        .events
        .send(WorkerEvent::Ready {
            worker_id: id,
            backend,
        })
        .is_err()
    {
        return;
    }
    debug!(worker = id, %backend, "Worker ready");

    while let Ok(command) = channels.commands.recv() {
        match command {
            WorkerCommand::Run(task) => {
                let task_id = task.id;
                let outcome = run_task(
                    id,
                    backend,
                    chunk_size,
                    stall_limit,
                    factory.as_ref(),
                    &channels,
                    task,
                );
                let finished = WorkerEvent::Finished {
                    worker_id: id,
                    task_id,
                    outcome,
                };
                if channels.events.send(finished).is_err() {
                    break;
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }

    debug!(worker = id, "Worker exiting");
}

/// Drive one task from creation to a terminal state.
fn run_task(
    worker_id: usize,
    backend: Backend,
    chunk_size: u64,
    stall_limit: Option<u64>,
    factory: &dyn SearcherFactory,
    channels: &WorkerChannels,
    task: Task,
) -> TaskOutcome {
    let task_id = task.id;
    info!(
        worker = worker_id,
        task = %task_id,
        kind = %task.kind,
        offset = task.sub_range.offset,
        units = task.target_count,
        "Task started"
    );

    let searcher = match factory.create(&task, backend) {
        Ok(searcher) => searcher,
        Err(err) => {
            warn!(worker = worker_id, task = %task_id, error = %err, "Searcher creation failed");
            return TaskOutcome {
                status: TaskStatus::Failed(err.into()),
                stats: TaskStats::default(),
            };
        }
    };

    let driver = Driver::new(&task, searcher, chunk_size).with_stall_limit(stall_limit);
    let outcome = driver.run(&channels.token, |batch| {
        trace!(
            worker = worker_id,
            task = %task_id,
            processed = batch.processed_count,
            items = batch.results.len(),
            "Batch"
        );
        channels
            .events
            .send(WorkerEvent::Batch {
                worker_id,
                task_id,
                batch,
            })
            .is_ok()
    });

    match &outcome.status {
        TaskStatus::Completed => info!(
            worker = worker_id,
            task = %task_id,
            steps = outcome.stats.steps,
            items = outcome.stats.items,
            "Task completed"
        ),
        TaskStatus::Cancelled => info!(
            worker = worker_id,
            task = %task_id,
            processed = outcome.stats.processed,
            "Task cancelled"
        ),
        TaskStatus::Failed(err) => warn!(
            worker = worker_id,
            task = %task_id,
            processed = outcome.stats.processed,
            error = %err,
            "Task failed"
        ),
    }

    outcome
}

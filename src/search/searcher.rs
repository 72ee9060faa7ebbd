//! Searcher contract and the per-task driving loop
//!
//! A [`Searcher`] walks one task's sub-range in bounded steps. The
//! [`Driver`] owns it for the lifetime of the task and moves through
//! `Created -> Running -> Done | Cancelled | Failed`:
//!
//! 1. Check the cancellation token (the only check per iteration)
//! 2. Call `step(chunk_size)`, catching errors and panics
//! 3. Validate the batch against the task's progress contract
//! 4. Hand the batch to the caller, finishing when `is_done` is set

use crate::error::{FailureReason, StepError};
use crate::search::definition::{Task, TaskId};
use crate::search::parallel::backend::Backend;
use crate::search::parallel::channel::CancellationToken;
use crate::search::result::{Batch, RawBatch};
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

/// Resumable unit of work over one task's sub-range.
///
/// `step` processes at most `max_units` further candidates and returns
/// the cumulative processed count. It is stateful across calls for the
/// lifetime of one task.
pub trait Searcher {
    fn step(&mut self, max_units: u64, token: &CancellationToken) -> Result<Batch, StepError>;
}

/// Computation unit that emits untagged payloads.
pub trait UntypedSearcher {
    fn step_raw(&mut self, max_units: u64, token: &CancellationToken)
    -> Result<RawBatch, StepError>;
}

/// Adapter tagging the output of an [`UntypedSearcher`] as it leaves the unit.
pub struct Tagged<S>(pub S);

impl<S: UntypedSearcher> Searcher for Tagged<S> {
    fn step(&mut self, max_units: u64, token: &CancellationToken) -> Result<Batch, StepError> {
        self.0.step_raw(max_units, token)?.into_batch()
    }
}

/// Creates searchers inside worker threads.
pub trait SearcherFactory: Send + Sync {
    /// Prepare the per-worker context (tables, device handles, ...).
    /// Called once on the worker thread before it accepts tasks.
    fn init_context(&self, _worker_id: usize, _backend: Backend) -> Result<(), String> {
        Ok(())
    }

    /// Instantiate a searcher for `task`.
    fn create(&self, task: &Task, backend: Backend) -> Result<Box<dyn Searcher>, StepError>;
}

impl<F> SearcherFactory for F
where
    F: Fn(&Task, Backend) -> Result<Box<dyn Searcher>, StepError> + Send + Sync,
{
    fn create(&self, task: &Task, backend: Backend) -> Result<Box<dyn Searcher>, StepError> {
        self(task, backend)
    }
}

/// Lifecycle of one driven task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveState {
    Created,
    Running,
    Done,
    Cancelled,
    Failed,
}

/// Counters collected while driving a task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub steps: u64,
    pub processed: u64,
    pub items: u64,
    pub elapsed: Duration,
}

/// How a task left the running state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Cancelled,
    Failed(FailureReason),
}

/// Final report for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub stats: TaskStats,
}

/// Drives one searcher through its task
pub struct Driver {
    task_id: TaskId,
    target_count: u64,
    chunk_size: u64,
    searcher: Box<dyn Searcher>,
    state: DriveState,
    failure: Option<StepError>,
    stall_limit: Option<u64>,
    stalled: u64,
    stats: TaskStats,
}

impl Driver {
    pub fn new(task: &Task, searcher: Box<dyn Searcher>, chunk_size: u64) -> Self {
        Self {
            task_id: task.id,
            target_count: task.target_count,
            chunk_size: chunk_size.max(1),
            searcher,
            state: DriveState::Created,
            failure: None,
            stall_limit: None,
            stalled: 0,
            stats: TaskStats::default(),
        }
    }

    /// Fail the task once more than `limit` consecutive non-final batches
    /// leave the processed count unchanged. `None` never fails a stall.
    pub fn with_stall_limit(mut self, limit: Option<u64>) -> Self {
        self.stall_limit = limit;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    /// Run one iteration. Returns the batch produced, or `None` once the
    /// driver has reached a terminal state.
    pub fn advance(&mut self, token: &CancellationToken) -> Option<Batch> {
        match self.state {
            DriveState::Done | DriveState::Cancelled | DriveState::Failed => return None,
            DriveState::Created => self.state = DriveState::Running,
            DriveState::Running => {}
        }

        if token.is_cancelled() {
            self.state = DriveState::Cancelled;
            return None;
        }

        let started = Instant::now();
        let chunk_size = self.chunk_size;
        let searcher = &mut self.searcher;
        let result = panic::catch_unwind(AssertUnwindSafe(|| searcher.step(chunk_size, token)));
        self.stats.elapsed += started.elapsed();
        self.stats.steps += 1;

        let batch = match result {
            Ok(Ok(batch)) => batch,
            Ok(Err(err)) => return self.fail(err),
            Err(payload) => return self.fail(StepError::Panicked(panic_message(&*payload))),
        };

        if let Err(err) = self.check_progress(&batch) {
            return self.fail(err);
        }
        if !batch.is_done && batch.processed_count == self.stats.processed {
            self.stalled += 1;
            if self.stall_limit.is_some_and(|limit| self.stalled > limit) {
                return self.fail(StepError::Protocol(format!(
                    "no progress for {} consecutive steps at {} of {}",
                    self.stalled, batch.processed_count, self.target_count
                )));
            }
        } else {
            self.stalled = 0;
        }

        self.stats.processed = batch.processed_count;
        self.stats.items += batch.results.len() as u64;
        if batch.is_done {
            self.state = DriveState::Done;
        }
        Some(batch)
    }

    /// Drive to a terminal state, handing every batch to `emit`. If `emit`
    /// returns false the receiving side is gone and the task is treated as
    /// cancelled.
    pub fn run<F>(mut self, token: &CancellationToken, mut emit: F) -> TaskOutcome
    where
        F: FnMut(Batch) -> bool,
    {
        while let Some(batch) = self.advance(token) {
            if !emit(batch) {
                if self.state == DriveState::Running {
                    self.state = DriveState::Cancelled;
                }
                break;
            }
        }
        self.finish()
    }

    pub fn finish(self) -> TaskOutcome {
        let status = match self.state {
            DriveState::Done => TaskStatus::Completed,
            DriveState::Failed => TaskStatus::Failed(FailureReason::Step(
                self.failure
                    .unwrap_or_else(|| StepError::Unit("unknown failure".into())),
            )),
            DriveState::Created | DriveState::Running | DriveState::Cancelled => {
                TaskStatus::Cancelled
            }
        };
        TaskOutcome {
            status,
            stats: self.stats,
        }
    }

    fn fail(&mut self, err: StepError) -> Option<Batch> {
        self.state = DriveState::Failed;
        self.failure = Some(err);
        None
    }

    /// Enforce the batch contract: counts never decrease or pass the
    /// target, and `is_done` holds exactly when the target is reached.
    /// Repeating the previous count is allowed.
    fn check_progress(&self, batch: &Batch) -> Result<(), StepError> {
        let previous = self.stats.processed;
        let current = batch.processed_count;

        if current < previous {
            return Err(StepError::Protocol(format!(
                "processed count went backwards from {} to {}",
                previous, current
            )));
        }
        if current > self.target_count {
            return Err(StepError::Protocol(format!(
                "processed count {} exceeds target {}",
                current, self.target_count
            )));
        }
        if batch.is_done && current != self.target_count {
            return Err(StepError::Protocol(format!(
                "reported done at {} of {}",
                current, self.target_count
            )));
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

//! Error types for seedsweep
//!
//! Planning errors are raised before any worker is engaged and abort the
//! whole search. Task-level errors are isolated to one task and surface as
//! failure entries next to the results of every other task. Pool-level
//! errors only occur when no worker is left to run anything.

use crate::search::definition::TaskId;
use thiserror::Error;

/// Errors raised while partitioning a search into tasks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The domain implied by the definition is empty or not representable.
    #[error("Invalid search domain: {reason}")]
    InvalidDomain { reason: String },

    /// The definition names a search kind nobody implements.
    #[error("Unsupported search kind '{kind}'")]
    UnsupportedKind { kind: String },

    /// Parallelism must be at least one.
    #[error("Requested parallelism must be at least 1")]
    InvalidParallelism,
}

/// A worker context failed to come up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Worker {worker_id} failed to initialize: {reason}")]
pub struct WorkerInitError {
    pub worker_id: usize,
    pub reason: String,
}

/// Errors produced by a single searcher step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// The computation unit reported an error.
    #[error("{0}")]
    Unit(String),

    /// The searcher could not be created for its task.
    #[error("Failed to create searcher: {0}")]
    Create(String),

    /// The step panicked.
    #[error("Searcher panicked: {0}")]
    Panicked(String),

    /// A batch broke the progress contract of its task.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// An untyped payload matched no known result shape.
    #[error("Unrecognized result payload: {0}")]
    UnrecognizedPayload(String),
}

/// Why a task did not run to completion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    #[error(transparent)]
    Step(#[from] StepError),

    /// The worker thread hosting the task went away.
    #[error("Worker {worker_id} terminated unexpectedly")]
    WorkerLost { worker_id: usize },
}

/// A failed task, reported alongside the successful results.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Task {task_id} failed on worker {worker_id} after {processed} units: {reason}")]
pub struct TaskFailure {
    pub task_id: TaskId,
    pub worker_id: usize,
    pub processed: u64,
    pub reason: FailureReason,
}

/// Pool-level errors that abort an `execute` call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// Every worker slot failed to initialize or has died.
    #[error("No usable workers remain ({failures} failed to start)")]
    NoUsableWorkers { failures: usize },
}

/// Errors from planning and executing a search end to end.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("Execution failed: {0}")]
    Pool(#[from] PoolError),
}

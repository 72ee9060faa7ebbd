//! Search planning and execution
//!
//! This module provides:
//! - Definitions: what a search covers and the tasks planned from it
//! - Planner: balanced partitioning of a domain into tasks
//! - Searcher: the steppable unit of work and its driving loop
//! - Parallel: the worker pool executing tasks
//! - Reference: a built-in computation unit for every search kind

pub mod definition;
pub mod parallel;
pub mod planner;
pub mod reference;
pub mod result;
pub mod searcher;

pub use definition::{SearchDefinition, SearchKind, SubRange, TargetRange, Task, TaskId};
pub use parallel::{ExecutionReport, PoolConfig, ProgressSnapshot, WorkerPool};
pub use planner::{plan, plan_for_pool};
pub use result::{Batch, ResultItem, ResultKind};
pub use searcher::{Searcher, SearcherFactory};

use crate::error::SearchError;

/// Plan `definition` for `pool` and execute it.
///
/// Planning errors are returned before any worker is engaged.
pub fn run_search<F>(
    definition: &SearchDefinition,
    pool: &mut WorkerPool,
    on_progress: F,
) -> Result<ExecutionReport, SearchError>
where
    F: FnMut(&ProgressSnapshot),
{
    let tasks = plan_for_pool(definition, pool.config())?;
    Ok(pool.execute_with_progress(tasks, on_progress)?)
}

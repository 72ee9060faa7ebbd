//! Partitioning of a search definition into balanced tasks
//!
//! The flattened domain `[0, size)` is cut into contiguous, disjoint
//! sub-ranges covering it exactly. When the size does not divide evenly the
//! first `size % n` tasks take one extra unit, so sizes differ by at most
//! one and no dynamic work-stealing is needed to keep workers busy.

use crate::error::PlanError;
use crate::search::definition::{SearchDefinition, SearchKind, SubRange, Task, TaskId};
use crate::search::parallel::PoolConfig;
use std::sync::Arc;

/// Split `definition` into `requested_parallelism` tasks.
///
/// Planning is pure: identical inputs always produce an identical,
/// order-stable task list.
pub fn plan(
    definition: &SearchDefinition,
    requested_parallelism: usize,
) -> Result<Vec<Task>, PlanError> {
    if requested_parallelism == 0 {
        return Err(PlanError::InvalidParallelism);
    }

    let kind: SearchKind = definition
        .kind
        .parse()
        .map_err(|_| PlanError::UnsupportedKind {
            kind: definition.kind.clone(),
        })?;

    let range = definition.range;
    let size = range.domain_size().ok_or_else(|| PlanError::InvalidDomain {
        reason: format!(
            "range [{}, {}) x {} is negative or overflows",
            range.start, range.end, range.combinations
        ),
    })?;
    if size == 0 {
        return Err(PlanError::InvalidDomain {
            reason: format!(
                "range [{}, {}) x {} is empty",
                range.start, range.end, range.combinations
            ),
        });
    }

    let params = Arc::new(definition.params.clone());
    let tasks = split(size, requested_parallelism)
        .into_iter()
        .enumerate()
        .map(|(i, sub_range)| Task {
            id: TaskId(i),
            kind,
            range,
            sub_range,
            params: Arc::clone(&params),
            target_count: sub_range.len,
        })
        .collect();

    Ok(tasks)
}

/// Plan with one task per worker the pool is configured for.
pub fn plan_for_pool(
    definition: &SearchDefinition,
    config: &PoolConfig,
) -> Result<Vec<Task>, PlanError> {
    plan(definition, config.max_workers)
}

/// Cut `[0, size)` into at most `parts` contiguous sub-ranges.
///
/// Never produces empty sub-ranges: a domain smaller than `parts` yields
/// `size` sub-ranges of one unit each.
fn split(size: u64, parts: usize) -> Vec<SubRange> {
    let parts = (parts as u64).min(size);
    if parts == 0 {
        return Vec::new();
    }
    let base = size / parts;
    let remainder = size % parts;

    let mut ranges = Vec::with_capacity(parts as usize);
    let mut offset = 0;
    for i in 0..parts {
        let len = base + u64::from(i < remainder);
        ranges.push(SubRange { offset, len });
        offset += len;
    }
    ranges
}

//! Live progress derived from cumulative per-task processed counts.

use crate::search::definition::{Task, TaskId};
use crate::search::result::Batch;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Point-in-time view of an execution's progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Share of the domain processed, in `[0, 100]`
    pub percentage: f64,
    pub elapsed_ms: u64,
    /// `None` until anything has been processed
    pub estimated_remaining_ms: Option<u64>,
    /// Units per millisecond
    pub throughput: f64,
    pub total_processed: u64,
    pub total_count: u64,
}

impl ProgressSnapshot {
    /// Throughput scaled to units per second.
    pub fn units_per_second(&self) -> f64 {
        self.throughput * 1000.0
    }
}

/// Tracks the latest processed count of every task.
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    total_count: u64,
    processed: BTreeMap<TaskId, u64>,
}

impl ProgressTracker {
    pub fn new(total_count: u64) -> Self {
        Self {
            started: Instant::now(),
            total_count,
            processed: BTreeMap::new(),
        }
    }

    /// Tracker for a planned task list; the total is the sum of targets.
    pub fn for_tasks(tasks: &[Task]) -> Self {
        Self::new(tasks.iter().map(|t| t.target_count).sum())
    }

    /// Record a batch. A count lower than one already seen for the task is
    /// ignored so the total never moves backwards.
    pub fn on_batch(&mut self, task_id: TaskId, batch: &Batch) {
        let entry = self.processed.entry(task_id).or_insert(0);
        *entry = (*entry).max(batch.processed_count);
    }

    /// Latest count for one task, zero before its first batch.
    pub fn processed_for(&self, task_id: TaskId) -> u64 {
        self.processed.get(&task_id).copied().unwrap_or(0)
    }

    pub fn total_processed(&self) -> u64 {
        self.processed.values().sum()
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(self.started.elapsed())
    }

    /// Snapshot as if `elapsed` had passed since tracking started.
    pub fn snapshot_at(&self, elapsed: Duration) -> ProgressSnapshot {
        let total_processed = self.total_processed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        let percentage = if self.total_count == 0 {
            0.0
        } else {
            (total_processed as f64 / self.total_count as f64 * 100.0).clamp(0.0, 100.0)
        };

        let throughput = if elapsed_ms > 0.0 {
            total_processed as f64 / elapsed_ms
        } else {
            0.0
        };

        let estimated_remaining_ms = if throughput > 0.0 {
            let remaining = self.total_count.saturating_sub(total_processed);
            Some((remaining as f64 / throughput).round() as u64)
        } else {
            None
        };

        ProgressSnapshot {
            percentage,
            elapsed_ms: elapsed.as_millis() as u64,
            estimated_remaining_ms,
            throughput,
            total_processed,
            total_count: self.total_count,
        }
    }
}

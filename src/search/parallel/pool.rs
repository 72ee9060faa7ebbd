//! Worker pool that executes planned tasks.
//!
//! The pool is a long-lived value: workers are spawned once by `init` and
//! reused by every `execute` call until `teardown` (or drop). The thread
//! calling `execute` only orchestrates. It admits tasks FIFO into idle
//! workers, folds incoming batches into the aggregator and tracker, and
//! never runs searcher code itself.

use crate::error::{FailureReason, PoolError, TaskFailure, WorkerInitError};
use crate::search::definition::{Task, TaskId};
use crate::search::parallel::aggregator::{AggregatedResults, ResultAggregator};
use crate::search::parallel::backend::{AcceleratorProbe, AcceleratorSupport, Backend, NoAccelerator};
use crate::search::parallel::channel::{CancellationToken, WorkerEvent, event_channel};
use crate::search::parallel::config::PoolConfig;
use crate::search::parallel::progress::{ProgressSnapshot, ProgressTracker};
use crate::search::parallel::worker::WorkerHandle;
use crate::search::searcher::{SearcherFactory, TaskStats, TaskStatus};
use crossbeam_channel::{Receiver, Sender};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Non-fatal problems found while bringing the pool up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolWarning {
    /// An accelerator was requested but the probe said no; a CPU worker
    /// took its slot.
    UnsupportedAcceleration { reason: String },
    /// A worker slot failed to start and was dropped.
    WorkerInitFailed(WorkerInitError),
}

impl std::fmt::Display for PoolWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolWarning::UnsupportedAcceleration { reason } => {
                write!(f, "Accelerator unavailable, using CPU worker instead: {}", reason)
            }
            PoolWarning::WorkerInitFailed(err) => write!(f, "{}", err),
        }
    }
}

/// Outcome of `init`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// Backend of every usable worker, in worker order.
    pub backends: Vec<Backend>,
    pub warnings: Vec<PoolWarning>,
}

impl InitReport {
    pub fn workers(&self) -> usize {
        self.backends.len()
    }

    pub fn accelerated(&self) -> bool {
        self.backends.contains(&Backend::Accelerator)
    }
}

/// Cloneable handle for cancelling the pool from another thread while
/// `execute` is running.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    running: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cooperative cancellation of the in-flight execution.
    /// Returns false, doing nothing, when the pool is idle.
    pub fn cancel(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            debug!("Cancel requested while pool is idle; ignoring");
            return false;
        }
        info!("Cancellation requested");
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// How one task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: TaskId,
    /// `None` if the task never left the queue.
    pub worker_id: Option<usize>,
    pub status: TaskStatus,
    pub stats: TaskStats,
}

/// Everything an execution produced
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub results: AggregatedResults,
    pub failures: Vec<TaskFailure>,
    /// One entry per submitted task, ordered by task id.
    pub tasks: Vec<TaskReport>,
    pub warnings: Vec<PoolWarning>,
    pub cancelled: bool,
    /// Final progress snapshot.
    pub progress: ProgressSnapshot,
}

impl ExecutionReport {
    pub fn completed_tasks(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count()
    }

    /// True when every task ran to completion.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.completed_tasks() == self.tasks.len()
    }
}

/// Clears the running flag when an execution ends, even on early return.
struct RunningGuard(Arc<AtomicBool>);

impl RunningGuard {
    fn enter(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(Arc::clone(flag))
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fixed set of workers executing tasks
pub struct WorkerPool {
    config: PoolConfig,
    factory: Arc<dyn SearcherFactory>,
    probe: Box<dyn AcceleratorProbe>,
    workers: Vec<WorkerHandle>,
    events_tx: Sender<WorkerEvent>,
    events_rx: Receiver<WorkerEvent>,
    token: CancellationToken,
    running: Arc<AtomicBool>,
    init_report: Option<InitReport>,
}

impl WorkerPool {
    pub fn new(
        config: PoolConfig,
        factory: Arc<dyn SearcherFactory>,
        probe: Box<dyn AcceleratorProbe>,
    ) -> Self {
        let (events_tx, events_rx) = event_channel(config.event_capacity);
        Self {
            config,
            factory,
            probe,
            workers: Vec::new(),
            events_tx,
            events_rx,
            token: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            init_report: None,
        }
    }

    /// Pool without accelerator support.
    pub fn cpu_only(config: PoolConfig, factory: Arc<dyn SearcherFactory>) -> Self {
        Self::new(config, factory, Box::new(NoAccelerator))
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn is_initialized(&self) -> bool {
        self.init_report.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the workers. Only the first successful call does any work;
    /// later calls return the same report.
    pub fn init(&mut self) -> Result<InitReport, PoolError> {
        if let Some(report) = &self.init_report {
            return Ok(report.clone());
        }

        let mut warnings = Vec::new();
        let accelerated = self.config.use_gpu
            && match self.probe.probe() {
                AcceleratorSupport::Available => true,
                AcceleratorSupport::Unavailable { reason } => {
                    warn!(reason = %reason, "Accelerator unavailable, falling back to CPU worker");
                    warnings.push(PoolWarning::UnsupportedAcceleration { reason });
                    false
                }
            };

        let mut pending = BTreeSet::new();
        let mut failures = 0;
        for id in 0..self.config.max_workers {
            let (backend, chunk_size) = if accelerated && id == 0 {
                (Backend::Accelerator, self.config.accelerator_chunk_size())
            } else {
                (Backend::Cpu, self.config.chunk_size)
            };

            match WorkerHandle::spawn(
                id,
                backend,
                chunk_size,
                self.config.max_stalled_steps,
                Arc::clone(&self.factory),
                self.events_tx.clone(),
                self.token.clone(),
            ) {
                Ok(worker) => {
                    pending.insert(id);
                    self.workers.push(worker);
                }
                Err(err) => {
                    warn!(worker = id, error = %err, "Failed to spawn worker");
                    failures += 1;
                    warnings.push(PoolWarning::WorkerInitFailed(err));
                }
            }
        }

        while !pending.is_empty() {
            match self.events_rx.recv_timeout(self.config.poll_interval) {
                Ok(WorkerEvent::Ready { worker_id, .. }) => {
                    pending.remove(&worker_id);
                }
                Ok(WorkerEvent::InitFailed { worker_id, reason }) => {
                    pending.remove(&worker_id);
                    self.discard_worker(worker_id);
                    failures += 1;
                    warnings.push(PoolWarning::WorkerInitFailed(WorkerInitError {
                        worker_id,
                        reason,
                    }));
                }
                Ok(other) => debug!(?other, "Ignoring stray event during init"),
                // The pool holds a sender, so the channel never disconnects
                Err(_) => {
                    // Threads that died before saying anything
                    if !self.events_rx.is_empty() {
                        continue;
                    }
                    let dead: Vec<usize> = self
                        .workers
                        .iter()
                        .filter(|w| pending.contains(&w.id()) && w.has_exited())
                        .map(|w| w.id())
                        .collect();
                    for worker_id in dead {
                        pending.remove(&worker_id);
                        self.discard_worker(worker_id);
                        failures += 1;
                        warn!(worker = worker_id, "Worker exited during initialization");
                        warnings.push(PoolWarning::WorkerInitFailed(WorkerInitError {
                            worker_id,
                            reason: "worker thread exited during initialization".into(),
                        }));
                    }
                }
            }
        }

        if self.workers.is_empty() {
            return Err(PoolError::NoUsableWorkers { failures });
        }

        let report = InitReport {
            backends: self.workers.iter().map(|w| w.backend()).collect(),
            warnings,
        };
        info!(
            workers = report.workers(),
            accelerated = report.accelerated(),
            warnings = report.warnings.len(),
            "Worker pool initialized"
        );
        self.init_report = Some(report.clone());
        Ok(report)
    }

    /// Handle for cancelling from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
            running: Arc::clone(&self.running),
        }
    }

    /// Cooperatively cancel the in-flight execution. No-op when idle.
    pub fn cancel(&self) -> bool {
        self.cancel_handle().cancel()
    }

    /// Run `tasks` to completion or cancellation.
    pub fn execute(&mut self, tasks: Vec<Task>) -> Result<ExecutionReport, PoolError> {
        self.execute_with_progress(tasks, |_| {})
    }

    /// Run `tasks`, handing progress snapshots to `on_progress` at most
    /// once per `progress_interval` plus once at the end.
    pub fn execute_with_progress<F>(
        &mut self,
        tasks: Vec<Task>,
        mut on_progress: F,
    ) -> Result<ExecutionReport, PoolError>
    where
        F: FnMut(&ProgressSnapshot),
    {
        let init = self.init()?;
        self.token.reset();
        let _running = RunningGuard::enter(&self.running);

        let mut tracker = ProgressTracker::for_tasks(&tasks);
        let mut aggregator = ResultAggregator::new();
        let mut queue: VecDeque<Task> = tasks.into();
        let mut reports = Vec::with_capacity(queue.len());
        let mut failures = Vec::new();
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut last_tick: Option<Instant> = None;

        info!(
            tasks = queue.len(),
            workers = self.workers.len(),
            units = tracker.total_count(),
            "Execution started"
        );

        self.dispatch(&mut queue);

        loop {
            let cancelled = self.token.is_cancelled();
            let busy = self.workers.iter().filter(|w| !w.is_idle()).count();
            if busy == 0 && (queue.is_empty() || cancelled) {
                break;
            }
            if self.workers.is_empty() {
                return Err(PoolError::NoUsableWorkers { failures: 0 });
            }
            if !cancelled && deadline.is_some_and(|d| Instant::now() >= d) {
                info!("Execution timeout reached, cancelling");
                self.token.cancel();
            }

            match self.events_rx.recv_timeout(self.config.poll_interval) {
                Ok(WorkerEvent::Batch { task_id, batch, .. }) => {
                    tracker.on_batch(task_id, &batch);
                    aggregator.push(batch);
                    if last_tick.is_none_or(|t| t.elapsed() >= self.config.progress_interval) {
                        on_progress(&tracker.snapshot());
                        last_tick = Some(Instant::now());
                    }
                }
                Ok(WorkerEvent::Finished {
                    worker_id,
                    task_id,
                    outcome,
                }) => {
                    if let Some(worker) = self.workers.iter_mut().find(|w| w.id() == worker_id) {
                        worker.release();
                    }
                    if let TaskStatus::Failed(reason) = &outcome.status {
                        failures.push(TaskFailure {
                            task_id,
                            worker_id,
                            processed: tracker.processed_for(task_id),
                            reason: reason.clone(),
                        });
                    }
                    reports.push(TaskReport {
                        task_id,
                        worker_id: Some(worker_id),
                        status: outcome.status,
                        stats: outcome.stats,
                    });
                }
                Ok(other) => debug!(?other, "Ignoring stray event during execution"),
                Err(_) => {}
            }

            self.reap_lost_workers(&tracker, &mut reports, &mut failures);
            if !self.token.is_cancelled() {
                self.dispatch(&mut queue);
            }
        }

        for task in queue.drain(..) {
            reports.push(TaskReport {
                task_id: task.id,
                worker_id: None,
                status: TaskStatus::Cancelled,
                stats: TaskStats::default(),
            });
        }
        reports.sort_by_key(|r| r.task_id);

        let progress = tracker.snapshot();
        on_progress(&progress);

        let report = ExecutionReport {
            results: aggregator.finish(),
            failures,
            tasks: reports,
            warnings: init.warnings,
            cancelled: self.token.is_cancelled(),
            progress,
        };
        info!(
            completed = report.completed_tasks(),
            failed = report.failures.len(),
            results = report.results.total(),
            cancelled = report.cancelled,
            elapsed_ms = report.progress.elapsed_ms,
            "Execution finished"
        );
        Ok(report)
    }

    /// Stop and join every worker. The pool can be initialized again.
    pub fn teardown(&mut self) {
        if self.workers.is_empty() {
            self.init_report = None;
            return;
        }
        debug!(workers = self.workers.len(), "Tearing down worker pool");

        self.token.cancel();
        for worker in &mut self.workers {
            worker.request_shutdown();
        }
        for worker in self.workers.drain(..) {
            // A busy worker may be blocked on a full event channel
            while !worker.has_exited() {
                while self.events_rx.try_recv().is_ok() {}
                thread::sleep(Duration::from_millis(1));
            }
            worker.join();
        }
        while self.events_rx.try_recv().is_ok() {}

        self.token.reset();
        self.init_report = None;
    }

    /// Assign queued tasks to idle workers in submission order.
    fn dispatch(&mut self, queue: &mut VecDeque<Task>) {
        let mut unreachable = Vec::new();
        for worker in self.workers.iter_mut().filter(|w| w.is_idle()) {
            let Some(task) = queue.pop_front() else {
                break;
            };
            debug!(worker = worker.id(), task = %task.id, "Assigning task");
            if let Err(task) = worker.assign(task) {
                warn!(worker = worker.id(), task = %task.id, "Worker unreachable, requeueing task");
                queue.push_front(task);
                unreachable.push(worker.id());
            }
        }
        for worker_id in unreachable {
            self.discard_worker(worker_id);
        }
    }

    /// Fail the tasks of busy workers whose threads have died. Only runs
    /// once the event queue is drained so no batch of theirs is lost.
    fn reap_lost_workers(
        &mut self,
        tracker: &ProgressTracker,
        reports: &mut Vec<TaskReport>,
        failures: &mut Vec<TaskFailure>,
    ) {
        if !self.events_rx.is_empty() {
            return;
        }
        let lost: Vec<(usize, TaskId)> = self
            .workers
            .iter()
            .filter(|w| !w.is_idle() && w.has_exited())
            .filter_map(|w| w.current_task().map(|t| (w.id(), t)))
            .collect();

        for (worker_id, task_id) in lost {
            warn!(worker = worker_id, task = %task_id, "Worker terminated unexpectedly");
            let processed = tracker.processed_for(task_id);
            failures.push(TaskFailure {
                task_id,
                worker_id,
                processed,
                reason: FailureReason::WorkerLost { worker_id },
            });
            reports.push(TaskReport {
                task_id,
                worker_id: Some(worker_id),
                status: TaskStatus::Failed(FailureReason::WorkerLost { worker_id }),
                stats: TaskStats {
                    processed,
                    ..TaskStats::default()
                },
            });
            self.discard_worker(worker_id);
        }
    }

    fn discard_worker(&mut self, worker_id: usize) {
        if let Some(pos) = self.workers.iter().position(|w| w.id() == worker_id) {
            let worker = self.workers.remove(pos);
            if !worker.join() {
                debug!(worker = worker_id, "Discarded worker had panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.teardown();
    }
}

use seedsweep::error::{FailureReason, SearchError, StepError};
use seedsweep::search::parallel::{
    AcceleratorSupport, Backend, CancellationToken, FixedProbe, PoolConfig, PoolWarning, WorkerPool,
};
use seedsweep::search::reference::ReferenceFactory;
use seedsweep::search::result::SeedMatch;
use seedsweep::search::searcher::TaskStatus;
use seedsweep::search::{
    Batch, ResultItem, SearchDefinition, SearchKind, Searcher, SearcherFactory, TargetRange, Task,
    TaskId, plan, run_search,
};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Emits one seed match per unit processed.
struct Counting {
    offset: u64,
    processed: u64,
    target: u64,
    steps: u64,
    delay: Duration,
    fail_after: Option<u64>,
}

impl Searcher for Counting {
    fn step(&mut self, max_units: u64, _token: &CancellationToken) -> Result<Batch, StepError> {
        if self.fail_after == Some(self.steps) {
            return Err(StepError::Unit("lookup table corrupted".into()));
        }
        self.steps += 1;
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let end = (self.processed + max_units).min(self.target);
        let results = (self.processed..end)
            .map(|i| {
                ResultItem::SeedMatch(SeedMatch {
                    instant: self.offset + i,
                    combination: 0,
                    initial_seed: i,
                })
            })
            .collect();
        self.processed = end;
        Ok(Batch::new(results, end, end == self.target))
    }
}

#[derive(Default)]
struct CountingFactory {
    delay: Duration,
    /// Task that fails after this many successful steps
    fail_task: Option<(TaskId, u64)>,
    /// Task whose creation kills the worker thread
    panic_task: Option<TaskId>,
    created: Mutex<Vec<(TaskId, Backend)>>,
}

impl CountingFactory {
    fn slow() -> Self {
        Self {
            delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn created(&self) -> Vec<(TaskId, Backend)> {
        self.created.lock().unwrap().clone()
    }
}

impl SearcherFactory for CountingFactory {
    fn create(&self, task: &Task, backend: Backend) -> Result<Box<dyn Searcher>, StepError> {
        self.created.lock().unwrap().push((task.id, backend));
        if self.panic_task == Some(task.id) {
            panic!("device context lost");
        }
        Ok(Box::new(Counting {
            offset: task.sub_range.offset,
            processed: 0,
            target: task.target_count,
            steps: 0,
            delay: self.delay,
            fail_after: self
                .fail_task
                .and_then(|(id, steps)| (id == task.id).then_some(steps)),
        }))
    }
}

fn config(workers: usize, chunk_size: u64) -> PoolConfig {
    PoolConfig::default()
        .with_workers(workers)
        .with_chunk_size(chunk_size)
        .with_progress_interval(Duration::ZERO)
        .with_poll_interval(Duration::from_millis(5))
}

fn boot_seed(start: u64, end: u64) -> SearchDefinition {
    SearchDefinition::new(SearchKind::BootSeed, TargetRange::new(start, end))
}

fn unavailable() -> Box<FixedProbe> {
    Box::new(FixedProbe(AcceleratorSupport::Unavailable {
        reason: "no device".into(),
    }))
}

#[test]
fn test_cancel_returns_partial_results_and_pool_is_reusable() {
    let factory = Arc::new(CountingFactory::slow());
    let mut pool = WorkerPool::cpu_only(config(2, 10), factory);
    let tasks = plan(&boot_seed(0, 200_000), 4).unwrap();

    let handle = pool.cancel_handle();
    let report = pool
        .execute_with_progress(tasks, |progress| {
            if progress.total_processed >= 200 {
                handle.cancel();
            }
        })
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert!(report.failures.is_empty());
    assert_eq!(report.tasks.len(), 4);
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
    // Tasks 2 and 3 were still queued
    assert_eq!(report.tasks[2].worker_id, None);
    assert_eq!(report.tasks[3].worker_id, None);
    assert!(report.progress.total_processed >= 200);
    assert!(report.progress.total_processed < 200_000);
    assert_eq!(report.results.total() as u64, report.progress.total_processed);

    let tasks = plan(&boot_seed(0, 1_000), 2).unwrap();
    let report = pool.execute(tasks).unwrap();
    assert!(!report.cancelled);
    assert!(report.is_complete());
    assert_eq!(report.results.total(), 1_000);
}

#[test]
fn test_cancel_from_another_thread() {
    let factory = Arc::new(CountingFactory::slow());
    let mut pool = WorkerPool::cpu_only(config(2, 10), factory);
    let handle = pool.cancel_handle();

    // Idle pool: nothing to cancel
    assert!(!handle.cancel());

    let canceller = thread::spawn(move || {
        while !handle.cancel() {
            thread::sleep(Duration::from_millis(1));
        }
    });

    let report = pool.execute(plan(&boot_seed(0, 100_000), 2).unwrap()).unwrap();
    canceller.join().unwrap();

    assert!(report.cancelled);
    assert!(!pool.is_running());
    assert_eq!(report.results.total() as u64, report.progress.total_processed);
}

#[test]
fn test_cancel_returns_within_a_few_steps() {
    let step = Duration::from_millis(20);
    let factory = Arc::new(CountingFactory {
        delay: step,
        ..Default::default()
    });
    let config = config(2, 1);
    let poll = config.poll_interval;
    let mut pool = WorkerPool::cpu_only(config, factory);
    let handle = pool.cancel_handle();

    let mut cancelled_at = None;
    let report = pool
        .execute_with_progress(plan(&boot_seed(0, 10_000), 2).unwrap(), |progress| {
            if cancelled_at.is_none() && progress.total_processed >= 10 {
                assert!(handle.cancel());
                cancelled_at = Some(Instant::now());
            }
        })
        .unwrap();
    let latency = cancelled_at.unwrap().elapsed();

    assert!(report.cancelled);
    assert!(report.tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
    assert!(report.progress.total_processed < 10_000);
    // One in-flight step per worker plus one poll of the event loop, with slack
    let bound = (step + poll) * 5;
    assert!(latency < bound, "execute returned {:?} after cancel, bound {:?}", latency, bound);
}

#[test]
fn test_one_failing_task_does_not_affect_the_other() {
    let factory = Arc::new(CountingFactory {
        fail_task: Some((TaskId(0), 3)),
        ..Default::default()
    });
    let mut pool = WorkerPool::cpu_only(config(2, 100), factory);
    let report = pool.execute(plan(&boot_seed(0, 2_000), 2).unwrap()).unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.task_id, TaskId(0));
    assert_eq!(failure.processed, 300);
    assert_eq!(
        failure.reason,
        FailureReason::Step(StepError::Unit("lookup table corrupted".into()))
    );

    assert!(matches!(report.tasks[0].status, TaskStatus::Failed(_)));
    assert_eq!(report.tasks[1].status, TaskStatus::Completed);
    assert_eq!(report.completed_tasks(), 1);
    // Three batches from the failed task plus the whole of the other one
    assert_eq!(report.results.total(), 1_300);
}

#[test]
fn test_worker_lost_during_task() {
    let factory = Arc::new(CountingFactory {
        panic_task: Some(TaskId(0)),
        ..Default::default()
    });
    let mut pool = WorkerPool::cpu_only(config(2, 10), factory);
    let report = pool.execute(plan(&boot_seed(0, 200), 2).unwrap()).unwrap();

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.task_id, TaskId(0));
    assert_eq!(
        failure.reason,
        FailureReason::WorkerLost {
            worker_id: failure.worker_id
        }
    );
    assert_eq!(
        report.tasks[0].status,
        TaskStatus::Failed(FailureReason::WorkerLost {
            worker_id: failure.worker_id
        })
    );
    assert_eq!(report.tasks[1].status, TaskStatus::Completed);
    assert_eq!(report.results.total(), 100);

    // The pool keeps going with reduced capacity
    assert_eq!(pool.workers().len(), 1);
    let report = pool.execute(plan(&boot_seed(0, 50), 3).unwrap()).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.results.total(), 50);
}

#[test]
fn test_tasks_admitted_in_submission_order() {
    let factory = Arc::new(CountingFactory::default());
    let mut pool = WorkerPool::cpu_only(config(1, 7), factory.clone());
    let report = pool.execute(plan(&boot_seed(0, 100), 5).unwrap()).unwrap();

    assert!(report.is_complete());
    let order: Vec<TaskId> = factory.created().into_iter().map(|(id, _)| id).collect();
    assert_eq!(order, (0..5).map(TaskId).collect::<Vec<_>>());
    assert!(report.tasks.iter().all(|t| t.worker_id == Some(0)));
}

#[test]
fn test_timeout_cancels_execution() {
    let factory = Arc::new(CountingFactory::slow());
    let config = config(2, 10).with_timeout(Duration::from_millis(100));
    let mut pool = WorkerPool::cpu_only(config, factory);

    let report = pool.execute(plan(&boot_seed(0, 1_000_000), 2).unwrap()).unwrap();
    assert!(report.cancelled);
    assert!(report.progress.elapsed_ms < 10_000);
    assert!(report.failures.is_empty());
}

#[test]
fn test_accelerator_fallback_is_a_warning() {
    let factory = Arc::new(CountingFactory::default());
    let mut pool = WorkerPool::new(config(2, 10).with_gpu(true), factory.clone(), unavailable());

    let init = pool.init().unwrap();
    assert_eq!(init.backends, vec![Backend::Cpu, Backend::Cpu]);
    assert_eq!(
        init.warnings,
        vec![PoolWarning::UnsupportedAcceleration {
            reason: "no device".into()
        }]
    );

    let report = pool.execute(plan(&boot_seed(0, 500), 2).unwrap()).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.warnings, init.warnings);
    assert!(factory.created().iter().all(|(_, b)| *b == Backend::Cpu));
}

#[test]
fn test_cpu_only_request_records_no_warning() {
    let factory = Arc::new(CountingFactory::default());
    let mut pool = WorkerPool::new(config(2, 10), factory, unavailable());

    let init = pool.init().unwrap();
    assert!(init.warnings.is_empty());
    assert!(!init.accelerated());
}

#[test]
fn test_accelerator_worker_uses_larger_steps() {
    let factory = Arc::new(CountingFactory::default());
    let probe = Box::new(FixedProbe(AcceleratorSupport::Available));
    let mut pool = WorkerPool::new(config(2, 10).with_gpu(true), factory.clone(), probe);

    let init = pool.init().unwrap();
    assert_eq!(init.backends, vec![Backend::Accelerator, Backend::Cpu]);
    assert!(init.warnings.is_empty());

    // A single task lands on the first idle worker
    let report = pool.execute(plan(&boot_seed(0, 1_600), 1).unwrap()).unwrap();
    assert_eq!(report.tasks[0].worker_id, Some(0));
    assert_eq!(report.tasks[0].stats.steps, 10);
    assert_eq!(factory.created(), vec![(TaskId(0), Backend::Accelerator)]);
}

#[test]
fn test_reference_search_week_on_four_workers() {
    let mut pool = WorkerPool::cpu_only(config(4, 1_000), Arc::new(ReferenceFactory));
    let report = run_search(&boot_seed(0, 604_800), &mut pool, |_| {}).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.tasks.len(), 4);
    for task in &report.tasks {
        assert_eq!(task.stats.processed, 151_200);
        assert_eq!(task.stats.steps, 152);
    }
    assert_eq!(report.progress.total_processed, 604_800);
    assert_eq!(report.progress.percentage, 100.0);

    let mut single = WorkerPool::cpu_only(config(1, 5_000), Arc::new(ReferenceFactory));
    let expected = run_search(&boot_seed(0, 604_800), &mut single, |_| {}).unwrap();

    let mut actual = report.results.seed_matches.clone();
    actual.sort_by_key(|m| m.instant);
    assert!(!actual.is_empty());
    assert_eq!(actual, expected.results.seed_matches);
}

#[test]
fn test_progress_reaches_completion() {
    let mut pool = WorkerPool::cpu_only(config(3, 50), Arc::new(ReferenceFactory));
    let mut snapshots = Vec::new();
    let def = SearchDefinition::new(SearchKind::Egg, TargetRange::new(0, 3_000));
    let report = run_search(&def, &mut pool, |p| snapshots.push(p.clone())).unwrap();

    assert!(report.is_complete());
    assert!(snapshots.len() > 1);
    for pair in snapshots.windows(2) {
        assert!(pair[1].total_processed >= pair[0].total_processed);
    }
    let last = snapshots.last().unwrap();
    assert_eq!(last.total_processed, 3_000);
    assert_eq!(last.estimated_remaining_ms.unwrap_or(0), 0);
    assert_eq!(report.results.eggs.len(), 3_000);
}

#[test]
fn test_planning_error_engages_no_worker() {
    let mut pool = WorkerPool::cpu_only(config(2, 10), Arc::new(ReferenceFactory));
    let mut def = boot_seed(0, 100);
    def.kind = "roaming".into();

    let err = run_search(&def, &mut pool, |_| {}).unwrap_err();
    assert!(matches!(err, SearchError::Plan(_)));
    assert!(!pool.is_initialized());
}

#[test]
fn test_invalid_parameters_fail_every_task() {
    let mut pool = WorkerPool::cpu_only(config(2, 10), Arc::new(ReferenceFactory));
    let def = SearchDefinition::new(SearchKind::TrainerInfo, TargetRange::new(0, 100));

    let report = run_search(&def, &mut pool, |_| {}).unwrap();
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| matches!(
        f.reason,
        FailureReason::Step(StepError::Create(_))
    )));
    assert!(report.results.is_empty());
}

//! Configuration for the worker pool.

use std::time::Duration;

/// Units per searcher step. Small enough for sub-second progress updates,
/// large enough to amortize the per-step overhead.
pub const DEFAULT_CHUNK_SIZE: u64 = 1_000;

/// Upper bound on workers, regardless of what is requested.
const MAX_WORKERS: usize = 256;

/// Configuration for pool construction and execution.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads to spawn.
    pub max_workers: usize,
    /// Whether one worker should be accelerator-backed if the probe allows.
    pub use_gpu: bool,
    /// Units per step on CPU workers.
    pub chunk_size: u64,
    /// Step size factor for the accelerator-backed worker.
    pub accelerator_chunk_multiplier: u64,
    /// Capacity of the shared event channel from workers to the pool.
    pub event_capacity: usize,
    /// Minimum time between progress snapshots handed to the observer.
    pub progress_interval: Duration,
    /// How long the orchestrator waits for an event before re-checking
    /// deadlines and worker liveness.
    pub poll_interval: Duration,
    /// Overall timeout per execution; the pool cancels itself when it expires.
    pub timeout: Option<Duration>,
    /// Consecutive non-final steps without progress before a task fails.
    /// `None` leaves stalled searchers to the timeout.
    pub max_stalled_steps: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().clamp(1, MAX_WORKERS),
            use_gpu: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            accelerator_chunk_multiplier: 16,
            event_capacity: 256,
            progress_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(50),
            timeout: None,
            max_stalled_steps: None,
        }
    }
}

impl PoolConfig {
    /// Set the number of workers (clamped to at least one).
    pub fn with_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.clamp(1, MAX_WORKERS);
        self
    }

    /// Request an accelerator-backed worker.
    pub fn with_gpu(mut self, use_gpu: bool) -> Self {
        self.use_gpu = use_gpu;
        self
    }

    /// Set the units per step (clamped to at least one).
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_accelerator_multiplier(mut self, multiplier: u64) -> Self {
        self.accelerator_chunk_multiplier = multiplier.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the overall timeout for one execution.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the overall timeout from an Option.
    pub fn with_timeout_option(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fail a task after `limit` consecutive steps that make no progress.
    pub fn with_max_stalled_steps(mut self, limit: u64) -> Self {
        self.max_stalled_steps = Some(limit);
        self
    }

    /// Step size for a worker on the accelerator backend.
    pub fn accelerator_chunk_size(&self) -> u64 {
        self.chunk_size.saturating_mul(self.accelerator_chunk_multiplier)
    }
}

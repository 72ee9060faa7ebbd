//! Parallel execution of planned search tasks.
//!
//! # Architecture
//!
//! The parallel engine consists of:
//! - A **pool** that owns the workers, admits tasks FIFO and multiplexes
//!   their batch streams
//! - **Workers**, one thread each, driving one searcher at a time
//! - A **channel system**: a single-slot command channel per worker and a
//!   bounded event channel shared by all workers
//! - An **aggregator** and a **progress tracker** fed by the pool as
//!   batches arrive
//!
//! The only state shared between workers is the cancellation token.
//!
//! # Example
//!
//! ```ignore
//! use seedsweep::search::parallel::{PoolConfig, WorkerPool};
//!
//! let config = PoolConfig::default().with_workers(4).with_gpu(true);
//! let mut pool = WorkerPool::new(config, factory, Box::new(probe));
//! let report = pool.execute_with_progress(tasks, |snap| {
//!     println!("{:.1}%", snap.percentage);
//! })?;
//! ```

pub mod aggregator;
pub mod backend;
pub mod channel;
pub mod config;
pub mod pool;
pub mod progress;
pub mod worker;

pub use aggregator::{AggregatedResults, ResultAggregator};
pub use backend::{AcceleratorProbe, AcceleratorSupport, Backend, FixedProbe, NoAccelerator};
pub use channel::CancellationToken;
pub use config::{DEFAULT_CHUNK_SIZE, PoolConfig};
pub use pool::{CancelHandle, ExecutionReport, InitReport, PoolWarning, TaskReport, WorkerPool};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use worker::{WorkerHandle, WorkerState};

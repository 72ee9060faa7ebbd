//! seedsweep - parallel search orchestration for seed-driven generators
//!
//! A search definition names a kind of outcome and a range of candidate
//! boot instants. The planner splits that range into balanced tasks, the
//! worker pool drives one searcher per task on its own thread, and the
//! pool merges the typed result batches and progress of every task into a
//! single report.
//!
//! ```ignore
//! use std::sync::Arc;
//! use seedsweep::search::{self, PoolConfig, SearchDefinition, SearchKind, TargetRange, WorkerPool};
//! use seedsweep::search::reference::ReferenceFactory;
//!
//! let def = SearchDefinition::new(SearchKind::BootSeed, TargetRange::new(0, 604_800));
//! let mut pool = WorkerPool::cpu_only(PoolConfig::default(), Arc::new(ReferenceFactory));
//! let report = search::run_search(&def, &mut pool, |p| println!("{:.1}%", p.percentage))?;
//! ```

pub mod error;
pub mod logging;
pub mod search;

pub use error::{PlanError, PoolError, SearchError, StepError, TaskFailure};

//! # engine_system
//!
//! Multi-threaded, dependency-driven system scheduler for the ECS engine.
//!
//! Systems declare what they touch and how they relate to each other; the
//! [`Scheduler`] turns those declarations into a dependency graph and runs
//! every system once per tick on a fixed pool of worker threads, never
//! letting two systems with conflicting access overlap.
//!
//! - Ordering: systems carry [`SequenceTag`]s and list tags they must run
//!   before, after or not during.
//! - Access: component reads/writes and entity mutation, declared through
//!   [`SystemDescriptor`] and enforced by [`AccessTracker`] at run time.
//! - Affinity: a system may require the invoking thread or exclusive use of
//!   the whole world.
//! - Priority: among runnable systems, those gating the most measured
//!   downstream work start first.
//!
//! ## Usage
//!
//! ```rust
//! use std::time::{Duration, Instant};
//!
//! use engine_component::ComponentTypeId;
//! use engine_system::{FnSystem, Scheduler, SchedulerConfig, SystemDescriptor, TickContext};
//!
//! let mut scheduler = Scheduler::new(SchedulerConfig::from_env()).unwrap();
//! scheduler.add_system(FnSystem::new(
//!     "gravity",
//!     SystemDescriptor::new().write(ComponentTypeId::from_name("Velocity")),
//!     |ctx: &TickContext| {
//!         let _ = ctx.dt_secs();
//!     },
//! ));
//!
//! let report = scheduler.invoke(Duration::from_millis(16), Instant::now()).unwrap();
//! assert!(report.is_clean());
//! ```

pub mod access;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod profiler;
pub mod registry;
pub mod scheduler;
pub mod system;

mod runner;

pub use access::{AccessCounter, AccessTracker};
pub use config::SchedulerConfig;
pub use context::TickContext;
pub use descriptor::{SequenceTag, SystemDescriptor};
pub use error::ScheduleError;
pub use graph::{GraphSnapshot, SystemSnapshot};
pub use profiler::PerformanceProfile;
pub use registry::SystemId;
pub use scheduler::{Scheduler, SystemFailure, SystemRef, TickReport};
pub use system::{AsAny, FnSystem, System};

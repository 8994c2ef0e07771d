//! # Chainkeeper Scheduler
//!
//! Job scheduling across a group of identical nodes. Each node arms the same
//! timers; the run coordinator makes sure only one node runs a given tick,
//! and the watchdog repairs jobs left behind by crashed nodes.

pub mod clock;
pub mod coordinator;
pub mod error;
pub mod handler;
pub mod job;
pub mod registry;
pub mod scheduler;
pub mod state;
pub mod timer;
pub mod watchdog;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use coordinator::{RunCoordinator, StartOutcome};
pub use error::{JobError, SchedulerError};
pub use handler::{HandlerRegistry, JobHandler};
pub use job::{JobContext, JobDefinition, JobRuntimeState, RunAttempt, RunStatus, ScheduleKind};
pub use registry::JobRegistry;
pub use scheduler::Scheduler;
pub use state::JobStateStore;
pub use timer::{FireCallback, JobTimer};
pub use watchdog::{Stall, Watchdog};

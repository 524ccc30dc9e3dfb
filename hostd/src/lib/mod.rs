//! A host dispatcher for a simulated multiprogramming system.
//!
//! Jobs are read out of a dispatch list and pass through admission
//! control (memory and I/O resources) before reaching a four-level
//! scheduler: a real-time FCFS queue which preempts everything, plus
//! three feedback levels for user jobs. The actual execution of jobs
//! is left to a [`Supervisor`](supervisor::Supervisor): either real
//! child processes driven by signals, or a simulation.

/// Common imports and type aliases.
mod utils;

/// Built-in limits and the run-time configuration.
pub mod config;

/// I/O resource vectors and the table of free resources.
pub mod rsrc;

/// Contiguous memory allocation over a fixed-size arena.
pub mod arena;

pub mod pcb;

/// Reading dispatch lists.
pub mod io;

/// Starting, suspending, resuming and terminating jobs.
pub mod supervisor;

/// The scheduling loop.
pub mod dispatcher;

pub mod logger;

pub use utils::*;
pub use config::{Config, ConfigError};
pub use rsrc::{ResourceTable, ResourceVec};
pub use arena::{ArenaError, BlockId, BlockView, Fit, MemoryArena};
pub use pcb::{MemoryLease, Pcb, Priority, Status};
pub use io::{DispatchListParser, LoadError};
pub use supervisor::{ExecHandle, Signal, SimulatedSupervisor, SuperviseError, Supervisor};
#[cfg(unix)]
pub use supervisor::ProcessSupervisor;
pub use dispatcher::{AuditError, Completion, Dispatcher, Event, EventKind, Rejection, RunSummary};

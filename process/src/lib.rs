//! Supervision of per-cell execution subprocesses.
//!
//! One OS process per `(session, cell)` key. Output streams back through a
//! bounded queue per process; exits are reported exactly once.

pub mod os;
mod supervisor;
mod types;

pub use supervisor::{ProcessHandle, ProcessSupervisor};
pub use types::{
    ExitInfo, ProcessConfig, ProcessEvent, ProcessKey, RunError, RunRequest, SpawnFailure,
};

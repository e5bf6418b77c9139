//! Session coordination for cellbook.
//!
//! [`SessionCoordinator`] turns validated channel intents into process runs,
//! analysis-service traffic, and broadcasts. Every open session is served by
//! one actor, so a session's cell list and open-file set are only ever
//! touched from one task.

mod actor;
mod coordinator;
mod files;
mod types;

pub use coordinator::SessionCoordinator;
pub use types::{
    CoordinatorError, EnvironmentSource, NoEnvironment, NoopTelemetry, StaticEnvironment,
    Telemetry, TelemetryEvent,
};

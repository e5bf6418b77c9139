//! Bridge to the external language analysis service.
//!
//! One [`LanguageBridge`] per statically-typed session mirrors that session's
//! code cells into a long-lived service process, turns the service's
//! asynchronous diagnostic events into normalized per-file results, and
//! answers navigation requests (quick info, definition, completions).

pub mod codec;
pub mod types;

pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod server;

mod bridge;
mod launcher;

pub use bridge::{LanguageBridge, PendingReply};
pub use diagnostics::severity_for_category;
pub use launcher::{CommandLauncher, ServiceIo, ServiceLauncher};
pub use server::ServiceMessage;
pub use types::{
    BridgeError, BridgeEvent, CompletionEntry, DefinitionLocation, LspConfig, QuickInfo,
    ServiceStopReason,
};

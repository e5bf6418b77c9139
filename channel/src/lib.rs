//! Topic-scoped pub/sub between notebook clients and the engine.
//!
//! Clients subscribe to `session:<id>` and exchange adjacently tagged
//! `{topic, event, payload}` frames. Every payload is checked against the
//! schema declared for its event before it is dispatched or delivered.

pub mod messages;
pub mod topic;
pub mod types;

mod hub;
mod ws;

pub use hub::{ConnectionId, Hub};
pub use messages::{InboundEvent, InboundMessage, OutboundEvent, OutboundMessage};
pub use topic::{Frame, TopicSpec};
pub use types::{ChannelConfig, Rejected, SchemaError, ValidationError};
pub use ws::{Dispatch, handle_text, router};

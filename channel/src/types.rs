use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Frames queued per connection before it is dropped as too slow.
    pub outbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 512,
        }
    }
}

/// Why a frame was refused. Nothing is dispatched or delivered for it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),
    #[error("'{event}' is not a recognized {direction} event")]
    UnknownEvent {
        event: String,
        direction: &'static str,
    },
    #[error("invalid payload for '{event}': {message}")]
    InvalidPayload { event: String, message: String },
}

/// A payload type produced a schema the validator could not compile.
#[derive(Debug, thiserror::Error)]
#[error("schema for '{event}' does not compile: {message}")]
pub struct SchemaError {
    pub event: &'static str,
    pub message: String,
}

/// A dispatcher refused a validated message (unknown session, full mailbox).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Rejected(pub String);

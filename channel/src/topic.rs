//! Topic declarations: which events a topic accepts and emits, and the
//! compiled schema each payload must satisfy.

use std::collections::HashMap;

use jsonschema::Validator;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use cellbook_types::SessionId;

use crate::messages::{
    CellDiagnostics, CellError, CellOutputChunk, CellRef, CellStatusChanged, CellUpdated,
    CompletionsResponse, CreateCell, DefinitionLocationResponse, DependencyInstallStatus, Empty,
    InboundEvent, InboundMessage, InstallDependency, LanguageServiceStatus, OutboundMessage,
    PositionRequest, QuickInfoResponse, RenameCell, UpdateCellSource,
};
use crate::types::{SchemaError, ValidationError};

pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const ERROR: &str = "error";

const SESSION_PREFIX: &str = "session:";

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Deserialize)]
struct RawFrame {
    topic: String,
    event: String,
    #[serde(default = "empty_object")]
    payload: Value,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Subscribe(String),
    Unsubscribe(String),
    Message(InboundMessage),
}

fn compile<T: JsonSchema>(event: &'static str) -> Result<(&'static str, Validator), SchemaError> {
    let schema = serde_json::to_value(schemars::schema_for!(T)).map_err(|e| SchemaError {
        event,
        message: e.to_string(),
    })?;
    let validator = jsonschema::validator_for(&schema).map_err(|e| SchemaError {
        event,
        message: e.to_string(),
    })?;
    Ok((event, validator))
}

/// The per-session topic: `session:<id>` with a fixed inbound and outbound
/// event table.
pub struct TopicSpec {
    prefix: &'static str,
    inbound: HashMap<&'static str, Validator>,
    outbound: HashMap<&'static str, Validator>,
}

impl TopicSpec {
    /// Compile every payload schema once.
    pub fn session() -> Result<Self, SchemaError> {
        let inbound = [
            compile::<CellRef>("execute-cell")?,
            compile::<CellRef>("stop-cell")?,
            compile::<CreateCell>("create-cell")?,
            compile::<RenameCell>("rename-cell")?,
            compile::<CellRef>("delete-cell")?,
            compile::<UpdateCellSource>("update-cell-source")?,
            compile::<InstallDependency>("install-dependency")?,
            compile::<Empty>("start-language-service")?,
            compile::<Empty>("stop-language-service")?,
            compile::<Empty>("request-diagnostics")?,
            compile::<PositionRequest>("request-quickinfo")?,
            compile::<PositionRequest>("request-definition-location")?,
            compile::<PositionRequest>("request-completions")?,
        ];
        let outbound = [
            compile::<CellStatusChanged>("cell-status-changed")?,
            compile::<CellUpdated>("cell-updated")?,
            compile::<CellRef>("cell-deleted")?,
            compile::<CellOutputChunk>("cell-output-chunk")?,
            compile::<CellError>("cell-error")?,
            compile::<CellDiagnostics>("diagnostics-for-cell")?,
            compile::<CellDiagnostics>("suggestions-for-cell")?,
            compile::<QuickInfoResponse>("quickinfo-response")?,
            compile::<DefinitionLocationResponse>("definition-location-response")?,
            compile::<CompletionsResponse>("completions-response")?,
            compile::<DependencyInstallStatus>("dependency-install-status")?,
            compile::<LanguageServiceStatus>("language-service-status")?,
        ];
        Ok(Self {
            prefix: SESSION_PREFIX,
            inbound: inbound.into_iter().collect(),
            outbound: outbound.into_iter().collect(),
        })
    }

    /// The session a topic name addresses, if it matches this declaration.
    #[must_use]
    pub fn session_for(&self, topic: &str) -> Option<SessionId> {
        topic
            .strip_prefix(self.prefix)
            .filter(|id| !id.is_empty())
            .map(SessionId::new)
    }

    #[must_use]
    pub fn accepts(&self, event: &str) -> bool {
        self.inbound.contains_key(event)
    }

    #[must_use]
    pub fn emits(&self, event: &str) -> bool {
        self.outbound.contains_key(event)
    }

    /// Parse and validate one inbound text frame.
    pub fn decode(&self, text: &str) -> Result<Frame, ValidationError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let Some(session) = self.session_for(&raw.topic) else {
            return Err(ValidationError::UnknownTopic(raw.topic));
        };

        match raw.event.as_str() {
            SUBSCRIBE => return Ok(Frame::Subscribe(raw.topic)),
            UNSUBSCRIBE => return Ok(Frame::Unsubscribe(raw.topic)),
            _ => {}
        }

        let Some(validator) = self.inbound.get(raw.event.as_str()) else {
            return Err(ValidationError::UnknownEvent {
                event: raw.event,
                direction: "inbound",
            });
        };
        check(validator, &raw.event, &raw.payload)?;

        let tagged = serde_json::json!({ "event": raw.event, "payload": raw.payload });
        let event: InboundEvent =
            serde_json::from_value(tagged).map_err(|e| ValidationError::InvalidPayload {
                event: raw.event.clone(),
                message: e.to_string(),
            })?;
        Ok(Frame::Message(InboundMessage { session, event }))
    }

    /// Serialize and validate one outbound message into a wire frame.
    pub fn encode(&self, message: &OutboundMessage) -> Result<String, ValidationError> {
        let name = message.event.name();
        let tagged = serde_json::to_value(&message.event)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        let payload = tagged.get("payload").cloned().unwrap_or_else(empty_object);

        let Some(validator) = self.outbound.get(name) else {
            return Err(ValidationError::UnknownEvent {
                event: name.to_string(),
                direction: "outbound",
            });
        };
        check(validator, name, &payload)?;

        Ok(frame(&message.session.topic(), name, payload))
    }
}

fn check(validator: &Validator, event: &str, payload: &Value) -> Result<(), ValidationError> {
    validator
        .validate(payload)
        .map_err(|e| ValidationError::InvalidPayload {
            event: event.to_string(),
            message: e.to_string(),
        })
}

/// Render a wire frame.
#[must_use]
pub fn frame(topic: &str, event: &str, payload: Value) -> String {
    serde_json::json!({
        "topic": topic,
        "event": event,
        "payload": payload,
    })
    .to_string()
}

/// The frame sent only to the connection whose message was refused.
#[must_use]
pub fn error_frame(topic: Option<&str>, message: &str) -> String {
    serde_json::json!({
        "topic": topic,
        "event": ERROR,
        "payload": { "message": message },
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{OutboundEvent, samples};
    use cellbook_types::CellId;

    fn spec() -> TopicSpec {
        TopicSpec::session().unwrap()
    }

    fn inbound(event: &str, payload: Value) -> String {
        frame("session:s1", event, payload)
    }

    #[test]
    fn every_typed_event_is_declared() {
        let spec = spec();
        for event in samples::inbound() {
            assert!(spec.accepts(event.name()), "{}", event.name());
        }
        for event in samples::outbound() {
            assert!(spec.emits(event.name()), "{}", event.name());
        }
    }

    #[test]
    fn sample_events_pass_their_own_schemas() {
        let spec = spec();
        for event in samples::inbound() {
            let json = serde_json::to_value(&event).unwrap();
            let text = inbound(json["event"].as_str().unwrap(), json["payload"].clone());
            let decoded = spec.decode(&text).unwrap();
            assert_eq!(
                decoded,
                Frame::Message(InboundMessage {
                    session: SessionId::new("s1"),
                    event,
                })
            );
        }
        for event in samples::outbound() {
            let message = OutboundMessage::new(SessionId::new("s1"), event);
            spec.encode(&message).unwrap();
        }
    }

    #[test]
    fn decodes_control_frames() {
        let spec = spec();
        assert_eq!(
            spec.decode(r#"{"topic":"session:s1","event":"subscribe"}"#),
            Ok(Frame::Subscribe("session:s1".into()))
        );
        assert_eq!(
            spec.decode(r#"{"topic":"session:s1","event":"unsubscribe","payload":{}}"#),
            Ok(Frame::Unsubscribe("session:s1".into()))
        );
    }

    #[test]
    fn rejects_unknown_event() {
        let err = spec()
            .decode(&inbound("format-disk", serde_json::json!({})))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnknownEvent { .. }));
    }

    #[test]
    fn rejects_unknown_topic() {
        let spec = spec();
        let text = frame("lobby", "execute-cell", serde_json::json!({"cell_id": "c"}));
        assert_eq!(
            spec.decode(&text),
            Err(ValidationError::UnknownTopic("lobby".into()))
        );
        let text = frame("session:", "execute-cell", serde_json::json!({"cell_id": "c"}));
        assert!(spec.decode(&text).is_err());
    }

    #[test]
    fn rejects_bad_payload_shape() {
        let spec = spec();
        let missing = inbound("execute-cell", serde_json::json!({}));
        assert!(matches!(
            spec.decode(&missing),
            Err(ValidationError::InvalidPayload { .. })
        ));
        let wrong_type = inbound(
            "request-quickinfo",
            serde_json::json!({"correlation_id": "r", "cell_id": "c", "offset": "three"}),
        );
        assert!(matches!(
            spec.decode(&wrong_type),
            Err(ValidationError::InvalidPayload { .. })
        ));
        let negative = inbound(
            "request-completions",
            serde_json::json!({"correlation_id": "r", "cell_id": "c", "offset": -1}),
        );
        assert!(spec.decode(&negative).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            spec().decode("{nope"),
            Err(ValidationError::Malformed(_))
        ));
        assert!(matches!(
            spec().decode(r#"{"event":"execute-cell"}"#),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn missing_payload_means_empty_object() {
        let decoded = spec()
            .decode(r#"{"topic":"session:s1","event":"start-language-service"}"#)
            .unwrap();
        assert!(matches!(
            decoded,
            Frame::Message(InboundMessage {
                event: InboundEvent::StartLanguageService(_),
                ..
            })
        ));
    }

    #[test]
    fn encode_renders_topic_frame() {
        let message = OutboundMessage::new(
            SessionId::new("s1"),
            OutboundEvent::CellDeleted(CellRef {
                cell_id: CellId::new("c1"),
            }),
        );
        let text = spec().encode(&message).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "topic": "session:s1",
                "event": "cell-deleted",
                "payload": { "cell_id": "c1" }
            })
        );
    }

    #[test]
    fn error_frame_shape() {
        let value: Value = serde_json::from_str(&error_frame(None, "bad")).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["topic"], Value::Null);
        assert_eq!(value["payload"]["message"], "bad");
    }
}

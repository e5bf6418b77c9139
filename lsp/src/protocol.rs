//! Internal message serde types for the analysis service protocol.

use serde::{Deserialize, Serialize};

use cellbook_types::LineOffset;

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub seq: u64,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

impl Request {
    pub fn new(seq: u64, command: &'static str, arguments: Option<serde_json::Value>) -> Self {
        Self {
            seq,
            kind: "request",
            command,
            arguments,
        }
    }
}

pub(crate) enum Incoming {
    Response {
        request_seq: u64,
        body: serde_json::Value,
    },
    Event {
        event: String,
        body: Option<serde_json::Value>,
    },
}

pub(crate) fn parse_incoming(frame: &serde_json::Value) -> Option<Incoming> {
    match frame.get("type").and_then(|t| t.as_str())? {
        "response" => Some(Incoming::Response {
            request_seq: frame.get("request_seq")?.as_u64()?,
            body: frame.clone(),
        }),
        "event" => Some(Incoming::Event {
            event: frame.get("event")?.as_str()?.to_string(),
            body: frame.get("body").cloned(),
        }),
        _ => None,
    }
}

/// Which diagnostic pass an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiagPass {
    Syntax,
    Semantic,
    Suggestion,
}

impl DiagPass {
    pub fn from_event(event: &str) -> Option<Self> {
        match event {
            "syntaxDiag" => Some(Self::Syntax),
            "semanticDiag" => Some(Self::Semantic),
            "suggestionDiag" => Some(Self::Suggestion),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiagEventBody {
    pub file: String,
    #[serde(default)]
    pub diagnostics: Vec<ServiceDiagnostic>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ServiceDiagnostic {
    pub start: LineOffset,
    pub end: LineOffset,
    pub text: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub category: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileSpan {
    pub file: String,
    pub start: LineOffset,
    pub end: LineOffset,
}

pub(crate) fn open_args(file: &str, content: &str) -> serde_json::Value {
    serde_json::json!({
        "file": file,
        "fileContent": content,
    })
}

pub(crate) fn file_args(file: &str) -> serde_json::Value {
    serde_json::json!({ "file": file })
}

pub(crate) fn location_args(file: &str, position: LineOffset) -> serde_json::Value {
    serde_json::json!({
        "file": file,
        "line": position.line,
        "offset": position.offset,
    })
}

pub(crate) fn geterr_args(files: &[String], delay_ms: u64) -> serde_json::Value {
    serde_json::json!({
        "files": files,
        "delay": delay_ms,
    })
}

/// Flatten a documentation field that is either a string or a list of
/// `{ "text": ... }` display parts.
pub(crate) fn display_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(
            3,
            "quickinfo",
            Some(location_args("/s/a.ts", LineOffset::new(2, 5))),
        );
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["type"], "request");
        assert_eq!(json["command"], "quickinfo");
        assert_eq!(json["arguments"]["line"], 2);
        assert_eq!(json["arguments"]["offset"], 5);
    }

    #[test]
    fn request_without_arguments_omits_field() {
        let json = serde_json::to_value(Request::new(1, "reloadProjects", None)).unwrap();
        assert!(json.get("arguments").is_none());
    }

    #[test]
    fn parses_response() {
        let frame = serde_json::json!({
            "seq": 0, "type": "response", "command": "quickinfo",
            "request_seq": 9, "success": true, "body": {}
        });
        match parse_incoming(&frame) {
            Some(Incoming::Response { request_seq, body }) => {
                assert_eq!(request_seq, 9);
                assert_eq!(body["success"], true);
            }
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn parses_event() {
        let frame = serde_json::json!({
            "seq": 0, "type": "event", "event": "semanticDiag",
            "body": { "file": "/s/a.ts", "diagnostics": [] }
        });
        match parse_incoming(&frame) {
            Some(Incoming::Event { event, body }) => {
                assert_eq!(event, "semanticDiag");
                let body: DiagEventBody = serde_json::from_value(body.unwrap()).unwrap();
                assert_eq!(body.file, "/s/a.ts");
                assert!(body.diagnostics.is_empty());
            }
            _ => panic!("expected event"),
        }
    }

    #[test]
    fn rejects_unknown_frames() {
        assert!(parse_incoming(&serde_json::json!({"type": "request"})).is_none());
        assert!(parse_incoming(&serde_json::json!({"seq": 1})).is_none());
        assert!(parse_incoming(&serde_json::json!({"type": "response"})).is_none());
    }

    #[test]
    fn service_diagnostic_deserialization() {
        let diag: ServiceDiagnostic = serde_json::from_value(serde_json::json!({
            "start": { "line": 1, "offset": 8 },
            "end": { "line": 1, "offset": 15 },
            "text": "Cannot find module './b'.",
            "code": 2307,
            "category": "error"
        }))
        .unwrap();
        assert_eq!(diag.code, 2307);
        assert_eq!(diag.start, LineOffset::new(1, 8));
    }

    #[test]
    fn diag_pass_from_event() {
        assert_eq!(DiagPass::from_event("syntaxDiag"), Some(DiagPass::Syntax));
        assert_eq!(DiagPass::from_event("suggestionDiag"), Some(DiagPass::Suggestion));
        assert_eq!(DiagPass::from_event("requestCompleted"), None);
    }

    #[test]
    fn display_text_handles_both_shapes() {
        let parts = serde_json::json!([{ "text": "const " }, { "text": "x" }]);
        assert_eq!(display_text(Some(&parts)), "const x");
        assert_eq!(display_text(Some(&serde_json::json!("doc"))), "doc");
        assert_eq!(display_text(None), "");
    }
}

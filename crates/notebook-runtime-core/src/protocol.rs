//! Wire protocol between the engine and the interpreter driver.
//!
//! Both directions carry one JSON object per line. Requests are tagged by
//! `op`; replies echo the request `id` so a stale or out-of-order line is
//! detected instead of being attributed to the wrong call.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An operation sent to the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum KernelOp {
    /// Run a code unit against the persistent namespace.
    Execute {
        /// Source of the code unit.
        code: String,
        /// Names to snapshot before running and restore on failure.
        backup: Vec<String>,
    },
    /// Liveness handshake.
    Ping,
    /// Ask the driver to exit its loop.
    Shutdown,
}

/// A framed request.
#[derive(Debug, Clone, Serialize)]
pub struct KernelRequest {
    /// Correlation id, echoed in the reply.
    pub id: u64,
    /// The operation.
    #[serde(flatten)]
    pub op: KernelOp,
}

/// Outcome classification reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    /// Parsed and ran without raising.
    Ok,
    /// Parsed, then raised during execution.
    Error,
    /// Never reached evaluation.
    ParseError,
    /// A protected variable could not be snapshotted; the code did not run.
    BackupError,
}

/// Which text stream an event was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// One output event, in emission order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputEvent {
    /// Text written to a stream.
    Stream {
        /// Target stream.
        name: StreamName,
        /// Written text.
        text: String,
    },
    /// A rich payload keyed by media type.
    Display {
        /// MIME type to payload. Binary payloads are base64 strings.
        data: BTreeMap<String, Value>,
    },
}

/// Exception details as reported by the driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct WireError {
    /// Exception type name.
    #[serde(default)]
    pub ename: String,
    /// Exception message.
    #[serde(default)]
    pub evalue: String,
    /// Formatted traceback lines.
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// Resident memory of the interpreter, sampled inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct MemorySample {
    /// Bytes resident before the submission.
    pub before: u64,
    /// Bytes resident after the submission.
    pub after: u64,
}

/// A framed reply.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct KernelReply {
    /// Correlation id of the request this answers.
    pub id: u64,
    /// Outcome classification.
    pub status: ReplyStatus,
    /// Output events in emission order.
    #[serde(default)]
    pub events: Vec<OutputEvent>,
    /// `repr` of a trailing bare expression, if it was not `None`.
    #[serde(default)]
    pub result: Option<String>,
    /// Exception details for non-`ok` statuses.
    #[serde(default)]
    pub error: Option<WireError>,
    /// Why protected variables could not be restored.
    #[serde(default)]
    pub restore_error: Option<String>,
    /// Memory sample; always present on execute replies.
    #[serde(default)]
    pub memory: Option<MemorySample>,
}

impl KernelReply {
    /// Bare acknowledgement, as sent for `ping` and `shutdown`.
    pub fn ack(id: u64) -> Self {
        Self {
            id,
            status: ReplyStatus::Ok,
            events: Vec::new(),
            result: None,
            error: None,
            restore_error: None,
            memory: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_request_encoding() {
        let request = KernelRequest {
            id: 7,
            op: KernelOp::Execute {
                code: "x = 1".into(),
                backup: vec!["x".into()],
            },
        };
        let json: Value = serde_json::to_value(&request).unwrap();

        assert_eq!(json["id"], 7);
        assert_eq!(json["op"], "execute");
        assert_eq!(json["code"], "x = 1");
        assert_eq!(json["backup"][0], "x");
    }

    #[test]
    fn test_ping_request_encoding() {
        let request = KernelRequest {
            id: 1,
            op: KernelOp::Ping,
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"id":1,"op":"ping"}"#
        );
    }

    #[test]
    fn test_reply_decoding() {
        let line = r#"{
            "id": 3,
            "status": "error",
            "events": [
                {"type": "stream", "name": "stdout", "text": "hi\n"},
                {"type": "display", "data": {"image/png": "iVBORw0KGgo="}}
            ],
            "result": null,
            "error": {"ename": "ValueError", "evalue": "bad", "traceback": ["line 1"]},
            "restore_error": null,
            "memory": {"before": 1024, "after": 2048}
        }"#;
        let reply: KernelReply = serde_json::from_str(line).unwrap();

        assert_eq!(reply.id, 3);
        assert_eq!(reply.status, ReplyStatus::Error);
        assert_eq!(reply.events.len(), 2);
        assert!(matches!(
            &reply.events[0],
            OutputEvent::Stream { name: StreamName::Stdout, text } if text == "hi\n"
        ));
        assert_eq!(reply.error.unwrap().ename, "ValueError");
        assert_eq!(
            reply.memory,
            Some(MemorySample {
                before: 1024,
                after: 2048
            })
        );
    }

    #[test]
    fn test_ack_decoding_defaults() {
        let reply: KernelReply = serde_json::from_str(r#"{"id": 9, "status": "ok"}"#).unwrap();
        assert_eq!(reply, KernelReply::ack(9));
    }
}

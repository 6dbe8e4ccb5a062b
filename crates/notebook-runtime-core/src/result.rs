//! Execution results.
//!
//! [`ExecutionResult`] is what every successful round trip to the interpreter
//! produces, whether the submitted code succeeded, raised, or failed to
//! parse. `timing` and `memory_stats` are populated on every path.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use notebook_runtime_common::KernelError;

use crate::protocol::{KernelReply, OutputEvent, ReplyStatus, StreamName};

/// The outcome of one execute call.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Captured standard output, concatenated in emission order.
    pub stdout: String,

    /// Captured standard error, concatenated in emission order.
    pub stderr: String,

    /// Rich payloads keyed by MIME type; last writer wins per type.
    pub display_data: BTreeMap<String, Value>,

    /// `repr` of the code unit's trailing expression, if any.
    pub result: Option<String>,

    /// Present iff the code raised, failed to parse, or could not be backed up.
    pub error: Option<ExecutionError>,

    /// Wall-clock duration of the call.
    #[serde(rename = "execution_time")]
    pub timing: Timing,

    /// Interpreter resident memory around the call.
    pub memory_stats: MemoryStats,

    /// Session execution counter after this call.
    pub execution_count: u64,
}

/// Which stage of an execution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The code failed to parse; nothing ran.
    Parse,
    /// The code parsed and raised while running.
    Runtime,
    /// A protected variable could not be copied; nothing ran.
    Backup,
}

/// An error raised inside the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionError {
    /// Failure stage.
    pub kind: ErrorKind,
    /// Exception type name (e.g. `ValueError`).
    pub name: String,
    /// Exception message.
    pub message: String,
    /// Formatted traceback lines.
    pub traceback: Vec<String>,
    /// Set when protected variables could not be restored after a runtime
    /// failure. It never replaces the original error.
    pub restore_failure: Option<String>,
}

/// Wall-clock timing of a call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timing {
    /// Elapsed seconds.
    pub seconds: f64,
}

impl Timing {
    /// Build from a measured duration.
    pub fn from_duration(elapsed: Duration) -> Self {
        Self {
            seconds: elapsed.as_secs_f64(),
        }
    }
}

/// Resident memory measured before and after a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Bytes resident before the call.
    pub before_bytes: u64,
    /// Bytes resident after the call.
    pub after_bytes: u64,
    /// `after_bytes - before_bytes`; negative when memory was released.
    pub delta_bytes: i64,
}

impl MemoryStats {
    /// Build from two samples.
    pub fn new(before_bytes: u64, after_bytes: u64) -> Self {
        let delta = i128::from(after_bytes) - i128::from(before_bytes);
        Self {
            before_bytes,
            after_bytes,
            delta_bytes: i64::try_from(delta).unwrap_or(if delta < 0 { i64::MIN } else { i64::MAX }),
        }
    }
}

impl ExecutionResult {
    /// Fold a driver reply into a result.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::Protocol`] if the reply carries no memory
    /// sample; every execute reply must.
    pub fn from_reply(
        reply: KernelReply,
        elapsed: Duration,
        execution_count: u64,
    ) -> Result<Self, KernelError> {
        let memory = reply
            .memory
            .ok_or_else(|| KernelError::protocol("execute reply carried no memory sample"))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut display_data = BTreeMap::new();
        for event in reply.events {
            match event {
                OutputEvent::Stream {
                    name: StreamName::Stdout,
                    text,
                } => stdout.push_str(&text),
                OutputEvent::Stream {
                    name: StreamName::Stderr,
                    text,
                } => stderr.push_str(&text),
                OutputEvent::Display { data } => display_data.extend(data),
            }
        }

        let kind = match reply.status {
            ReplyStatus::Ok => None,
            ReplyStatus::Error => Some(ErrorKind::Runtime),
            ReplyStatus::ParseError => Some(ErrorKind::Parse),
            ReplyStatus::BackupError => Some(ErrorKind::Backup),
        };
        let error = kind.map(|kind| {
            let wire = reply.error.unwrap_or_default();
            ExecutionError {
                kind,
                name: wire.ename,
                message: wire.evalue,
                traceback: wire.traceback,
                restore_failure: reply.restore_error,
            }
        });

        Ok(Self {
            stdout,
            stderr,
            display_data,
            result: reply.result,
            error,
            timing: Timing::from_duration(elapsed),
            memory_stats: MemoryStats::new(memory.before, memory.after),
            execution_count,
        })
    }

    /// Returns `true` if the code ran without raising.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The error kind, if the call failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

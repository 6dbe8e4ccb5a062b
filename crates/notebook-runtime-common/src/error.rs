//! Error types for the notebook-runtime.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`SessionError`]: Registry and engine errors returned to callers
//! - [`KernelError`]: Failures talking to an interpreter process
//! - [`HistoryError`]: Failures persisting a session's cell history
//!
//! Failures raised *inside* the interpreter (syntax errors, exceptions) are
//! not errors at this level. They travel as data in the execution result.

use std::io;

use thiserror::Error;

/// Errors returned by the session registry and execution engine.
///
/// Apart from [`SessionError::SessionUnavailable`], every variant is locally
/// recoverable: the caller can retry with corrected input and no other
/// session is affected.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Caller-supplied input was rejected before reaching the interpreter.
    #[error("Validation failed: {reason}")]
    Validation {
        /// Description of what was rejected.
        reason: String,
    },

    /// A live session with this id already exists.
    #[error("Session already exists: {session_id}")]
    DuplicateSession {
        /// The conflicting session id.
        session_id: String,
    },

    /// No session with this id is registered.
    #[error("Session not found: {session_id}")]
    UnknownSession {
        /// The requested session id.
        session_id: String,
    },

    /// The operation needs an active session and none is selected.
    #[error("No active session; create or switch to a session first")]
    NoActiveSession,

    /// The session exists but its interpreter is gone.
    #[error("Session is dead: {session_id}")]
    SessionDead {
        /// The dead session's id.
        session_id: String,
    },

    /// The interpreter crashed, stopped responding, or timed out.
    ///
    /// The session transitions to dead; it must be shut down and recreated.
    #[error("Session unavailable: {session_id}: {source}")]
    SessionUnavailable {
        /// The affected session id.
        session_id: String,
        /// The underlying kernel failure.
        #[source]
        source: KernelError,
    },

    /// The interpreter process could not be started.
    #[error("Failed to start session {session_id}: {source}")]
    Spawn {
        /// The session that failed to start.
        session_id: String,
        /// The underlying kernel failure.
        #[source]
        source: KernelError,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the interpreter process and its wire protocol.
#[derive(Error, Debug)]
pub enum KernelError {
    /// The interpreter program could not be launched.
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        /// The program that was launched.
        program: String,
        /// The launch failure.
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the interpreter failed.
    #[error("Kernel IO error: {0}")]
    Io(#[from] io::Error),

    /// The interpreter sent something that is not a valid reply.
    #[error("Kernel protocol error: {reason}")]
    Protocol {
        /// Description of the protocol violation.
        reason: String,
    },

    /// The interpreter process exited.
    #[error("Kernel exited (code: {code:?})")]
    Exited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
    },

    /// No reply arrived within the configured timeout.
    #[error("Kernel did not respond within {duration_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// The interpreter was killed while a call was in flight.
    #[error("Kernel was killed during a call")]
    Killed,
}

/// Errors from persisting a session's cell history.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Writing the notebook file failed.
    #[error("Failed to write notebook '{path}': {source}")]
    Io {
        /// The notebook path.
        path: String,
        /// The write failure.
        #[source]
        source: io::Error,
    },

    /// Encoding the notebook document failed.
    #[error("Failed to encode notebook: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    /// Create a new `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a new `DuplicateSession` error.
    pub fn duplicate_session(session_id: impl Into<String>) -> Self {
        Self::DuplicateSession {
            session_id: session_id.into(),
        }
    }

    /// Create a new `UnknownSession` error.
    pub fn unknown_session(session_id: impl Into<String>) -> Self {
        Self::UnknownSession {
            session_id: session_id.into(),
        }
    }

    /// Create a new `SessionDead` error.
    pub fn session_dead(session_id: impl Into<String>) -> Self {
        Self::SessionDead {
            session_id: session_id.into(),
        }
    }

    /// Create a new `SessionUnavailable` error.
    pub fn unavailable(session_id: impl Into<String>, source: KernelError) -> Self {
        Self::SessionUnavailable {
            session_id: session_id.into(),
            source,
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::DuplicateSession { .. } => "duplicate_session",
            Self::UnknownSession { .. } => "unknown_session",
            Self::NoActiveSession => "no_active_session",
            Self::SessionDead { .. } => "session_dead",
            Self::SessionUnavailable { .. } => "session_unavailable",
            Self::Spawn { .. } => "spawn_failed",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::Io(_) => "io",
        }
    }

    /// Returns `true` if the session this error refers to can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SessionUnavailable { .. } | Self::SessionDead { .. }
        )
    }

    /// Returns `true` if the caller can fix this error by correcting its input.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::DuplicateSession { .. }
                | Self::UnknownSession { .. }
                | Self::NoActiveSession
        )
    }
}

impl KernelError {
    /// Create a new `Protocol` error.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }
}

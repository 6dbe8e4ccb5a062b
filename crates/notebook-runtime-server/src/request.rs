//! HTTP request bodies.
//!
//! This module provides the JSON bodies accepted by the session and execute
//! routes and converts execute bodies into engine requests.

use std::path::PathBuf;

use serde::Deserialize;

use notebook_runtime_common::SessionError;
use notebook_runtime_core::ExecuteRequest;

/// Body of `POST /sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionBody {
    /// Session id to register.
    #[serde(alias = "session_id")]
    pub id: String,
    /// Backing notebook path.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Interpreter kind.
    #[serde(default, alias = "kernel")]
    pub kind: Option<String>,
}

/// One name or a list of names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum NameList {
    #[default]
    Empty,
    One(String),
    Many(Vec<String>),
}

impl NameList {
    /// The names, with blanks dropped.
    pub fn into_vec(self) -> Vec<String> {
        let names = match self {
            Self::Empty => Vec::new(),
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        };
        names.into_iter().filter(|name| !name.trim().is_empty()).collect()
    }
}

/// Body of the `/execute/*` routes.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteBody {
    /// Code unit to run.
    pub code: String,
    /// Variables to protect against a failing code unit.
    #[serde(default, alias = "backup_var")]
    pub backup_vars: NameList,
    /// Variable to echo after the code unit.
    #[serde(default)]
    pub show_var: Option<String>,
    /// Target session; the active session when omitted.
    #[serde(default, alias = "session_id")]
    pub session: Option<String>,
}

impl ExecuteBody {
    /// Build the engine request.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `show_var` does not occur in the code.
    pub fn into_request(self, add_to_history: bool) -> Result<(Option<String>, ExecuteRequest), SessionError> {
        let request = if add_to_history {
            ExecuteRequest::step(self.code)
        } else {
            ExecuteRequest::probe(self.code)
        };
        let mut request = request.with_backup(self.backup_vars.into_vec());
        if let Some(name) = self.show_var.filter(|name| !name.trim().is_empty()) {
            request = request.with_show_var(&name)?;
        }
        Ok((self.session, request))
    }
}

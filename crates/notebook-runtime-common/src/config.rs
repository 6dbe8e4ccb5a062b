//! Configuration structures for the notebook-runtime.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`KernelConfig`]: Which interpreter programs back which session kinds
//! - [`ExecutionConfig`]: Per-call limits (timeout, shutdown grace period)
//! - [`HistoryConfig`]: Cell history policy and notebook persistence

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the notebook-runtime.
/// It can be loaded from TOML or JSON.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Interpreter selection.
    #[serde(default)]
    pub kernel: KernelConfig,

    /// Per-call execution limits.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Cell history settings.
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Interpreter selection.
///
/// Each session names a kind (e.g. `"python3"`); the kind is looked up in
/// `kinds` to find the program that hosts the session's namespace.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KernelConfig {
    /// Kind used when a session is created without one.
    #[serde(default = "defaults::default_kind")]
    pub default_kind: String,

    /// Known interpreter kinds.
    #[serde(default = "defaults::kinds")]
    pub kinds: BTreeMap<String, KernelSpec>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            default_kind: defaults::default_kind(),
            kinds: defaults::kinds(),
        }
    }
}

impl KernelConfig {
    /// Look up the spec for an interpreter kind.
    pub fn spec(&self, kind: &str) -> Option<&KernelSpec> {
        self.kinds.get(kind)
    }
}

/// How to launch one interpreter kind.
///
/// The program must accept `-c <source>`; the runtime appends its driver
/// after `args`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct KernelSpec {
    /// Program to execute (looked up on `PATH` if relative).
    pub program: String,

    /// Arguments placed before the driver.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the interpreter.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Language name recorded in persisted notebooks.
    #[serde(default = "defaults::language")]
    pub language: String,
}

impl KernelSpec {
    /// Spec for a Python interpreter at `program`.
    pub fn python(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec!["-u".to_string()],
            env: BTreeMap::new(),
            language: defaults::language(),
        }
    }
}

/// Per-call execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Execution timeout in milliseconds.
    ///
    /// An execute call that exceeds this is fatal for its session.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// How long a shutdown waits for the interpreter to exit before killing it.
    #[serde(default = "defaults::shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// How long a newly spawned interpreter has to answer its handshake.
    #[serde(default = "defaults::startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::timeout_ms(),
            shutdown_grace_ms: defaults::shutdown_grace_ms(),
            startup_timeout_ms: defaults::startup_timeout_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get the shutdown grace period as a `Duration`.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Get the startup timeout as a `Duration`.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

/// Whether failed step submissions are recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Only submissions that ran to completion become cells.
    #[default]
    SuccessOnly,
    /// Failed submissions are recorded too, with their error output.
    AllSubmissions,
}

/// Cell history configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Which step submissions are appended.
    #[serde(default)]
    pub policy: HistoryPolicy,

    /// Write the history to the session's backing path after every append.
    #[serde(default = "defaults::persist")]
    pub persist: bool,

    /// Backing path for sessions created without one.
    ///
    /// Relative paths resolve against the working directory.
    #[serde(default = "defaults::default_path")]
    pub default_path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            policy: HistoryPolicy::default(),
            persist: defaults::persist(),
            default_path: defaults::default_path(),
        }
    }
}

impl HistoryConfig {
    /// Resolve a session's backing path.
    ///
    /// An explicit path wins; otherwise `default_path` is joined onto the
    /// current working directory.
    pub fn resolve_path(&self, explicit: Option<&Path>) -> io::Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path.to_path_buf()),
            None => Ok(std::env::current_dir()?.join(&self.default_path)),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::KernelSpec;

    pub fn default_kind() -> String {
        "python3".to_string()
    }

    pub fn kinds() -> BTreeMap<String, KernelSpec> {
        let mut kinds = BTreeMap::new();
        kinds.insert("python3".to_string(), KernelSpec::python("python3"));
        kinds
    }

    pub fn language() -> String {
        "python".to_string()
    }

    pub const fn timeout_ms() -> u64 {
        600_000
    }

    pub const fn shutdown_grace_ms() -> u64 {
        2_000
    }

    pub const fn startup_timeout_ms() -> u64 {
        30_000
    }

    pub const fn persist() -> bool {
        true
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("ab_notebook.ipynb")
    }
}

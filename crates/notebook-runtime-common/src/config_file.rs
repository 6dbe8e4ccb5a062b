//! Configuration file structures for the notebook-runtime.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP shim settings
//! - [`SessionEntry`]: A session created at startup

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.kernel]
/// default_kind = "python3"
///
/// [runtime.kernel.kinds.python3]
/// program = "python3"
/// args = ["-u"]
///
/// [runtime.execution]
/// timeout_ms = 600_000
/// shutdown_grace_ms = 2_000
///
/// [runtime.history]
/// policy = "success_only"
///
/// [server]
/// bind_addr = "127.0.0.1:8787"
/// figures_dir = "./figures"
///
/// [[sessions]]
/// id = "main"
/// path = "./main.ipynb"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (kernels, execution, history).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Sessions to create at startup.
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "127.0.0.1:8787").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    ///
    /// Must exceed the execution timeout, or long cells are cut off by the
    /// HTTP layer before the engine can report on them.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,

    /// Directory rendered figures are written to and served from.
    #[serde(default = "defaults::figures_dir")]
    pub figures_dir: PathBuf,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
            figures_dir: defaults::figures_dir(),
        }
    }
}

/// A session to create at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionEntry {
    /// Unique identifier for the session.
    pub id: String,

    /// Backing notebook path; defaults to the runtime's default path.
    pub path: Option<PathBuf>,

    /// Interpreter kind; defaults to the runtime's default kind.
    pub kind: Option<String>,
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    pub fn bind_addr() -> String {
        "127.0.0.1:8787".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        900
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub fn figures_dir() -> PathBuf {
        PathBuf::from("./figures")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HistoryPolicy;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.server.bind_addr, "127.0.0.1:8787");
        assert_eq!(config.server.request_timeout_secs, 900);
        assert!(config.server.graceful_shutdown);
        assert_eq!(config.server.figures_dir, PathBuf::from("./figures"));
        assert!(config.sessions.is_empty());
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:3000"
        "#;

        let config = tokio_test::assert_ok!(ConfigFile::from_toml(toml));

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        // Defaults applied
        assert_eq!(config.server.request_timeout_secs, 900);
        assert_eq!(config.runtime.kernel.default_kind, "python3");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.kernel]
            default_kind = "venv"

            [runtime.kernel.kinds.venv]
            program = "/opt/venv/bin/python"
            args = ["-u", "-X", "utf8"]
            env = { OMP_NUM_THREADS = "1" }

            [runtime.execution]
            timeout_ms = 5_000
            shutdown_grace_ms = 100

            [runtime.history]
            policy = "all_submissions"
            persist = false
            default_path = "work.ipynb"

            [server]
            bind_addr = "0.0.0.0:9000"
            request_timeout_secs = 60
            graceful_shutdown = false
            figures_dir = "/srv/figures"

            [[sessions]]
            id = "main"
            path = "./main.ipynb"

            [[sessions]]
            id = "scratch"
            kind = "venv"
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.kernel.default_kind, "venv");
        let venv = config.runtime.kernel.spec("venv").unwrap();
        assert_eq!(venv.program, "/opt/venv/bin/python");
        assert_eq!(venv.args.len(), 3);
        assert_eq!(venv.env.get("OMP_NUM_THREADS").map(String::as_str), Some("1"));
        assert_eq!(venv.language, "python");
        assert_eq!(config.runtime.execution.timeout_ms, 5_000);
        assert_eq!(
            config.runtime.history.policy,
            HistoryPolicy::AllSubmissions
        );
        assert!(!config.runtime.history.persist);
        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert!(!config.server.graceful_shutdown);
        assert_eq!(config.server.figures_dir, PathBuf::from("/srv/figures"));
        assert_eq!(config.sessions.len(), 2);
        assert_eq!(config.sessions[0].id, "main");
        assert!(config.sessions[0].kind.is_none());
        assert_eq!(config.sessions[1].kind.as_deref(), Some("venv"));
        assert!(config.sessions[1].path.is_none());
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        tokio_test::assert_err!(ConfigFile::from_toml(invalid));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigFile::from_file("/nonexistent/notebook-runtime.toml").unwrap_err();
        assert!(matches!(err, ConfigFileError::Io { .. }));
    }
}

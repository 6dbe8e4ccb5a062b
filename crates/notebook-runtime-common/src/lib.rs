//! Common types, errors, and configuration for notebook-runtime.
//!
//! This crate provides shared functionality used across the notebook-runtime workspace:
//! - Error types using `thiserror` for the session, kernel, and history layers
//! - Configuration structures for kernels, execution limits, and cell history
//! - The TOML configuration file loaded by the binary

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{
    ExecutionConfig, HistoryConfig, HistoryPolicy, KernelConfig, KernelSpec, RuntimeConfig,
};
pub use config_file::{ConfigFile, ConfigFileError, ServerConfigFile, SessionEntry};
pub use error::{HistoryError, KernelError, SessionError};

//! HTTP shim for notebook-runtime.
//!
//! This crate exposes the session registry over HTTP so that an agent can
//! drive notebook sessions as tool calls. It handles:
//!
//! - Session lifecycle routes (create, switch, list, shutdown)
//! - Execute routes (`probe`, `step`, `doc`)
//! - Persisting rendered figures and serving them back by URL
//! - Health and readiness checks
//!
//! # Quick Start
//!
//! ```ignore
//! use notebook_runtime_common::RuntimeConfig;
//! use notebook_runtime_server::{AppState, NotebookServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = AppState::from_config(&RuntimeConfig::default(), "./figures");
//!     NotebookServer::new(state, ServerConfig::default()).run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod figures;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use figures::FigureStore;
pub use server::{NotebookServer, ServerConfig, TestHandle};
pub use state::AppState;

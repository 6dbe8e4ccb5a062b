//! Session execution engine and registry for notebook-runtime.
//!
//! This crate runs code units against long-lived interpreter processes:
//! - [`SessionRegistry`]: Owns sessions and the active-session pointer
//! - [`Session`]: One interpreter bound to an id, serializing execute calls
//! - [`ExecutionEngine`]: Validation, timing, history, and failure handling
//! - [`ProcessKernel`]: The interpreter child process and its line protocol
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   SessionRegistry                       │
//! │  (Shared, one short lock over the id map + active id)   │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │              Session / ExecutionEngine                  │
//! │  (Per session, one execute call at a time)              │
//! │  - Request validation                                   │
//! │  - Timing, cell history                                 │
//! └─────────────────────────────────────────────────────────┘
//!                            │  JSON lines over stdio
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                Interpreter + driver                     │
//! │  (Child process, persistent namespace)                  │
//! │  - Output capture, display payloads                     │
//! │  - Memory sampling, variable snapshot/restore           │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod history;
pub mod kernel;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod session;
pub mod validate;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use engine::ExecutionEngine;
pub use history::{Cell, CellHistory, CellOutput};
pub use kernel::{KernelFactory, KernelTransport, ProcessKernel, ProcessKernelFactory};
pub use registry::{SessionListing, SessionRegistry};
pub use result::{ErrorKind, ExecutionError, ExecutionResult, MemoryStats, Timing};
pub use session::{Session, SessionInfo, SessionState};
pub use validate::{ExecuteRequest, SNAPSHOT_SLOT};

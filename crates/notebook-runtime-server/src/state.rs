//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::path::PathBuf;
use std::sync::Arc;

use notebook_runtime_common::RuntimeConfig;
use notebook_runtime_core::SessionRegistry;

use crate::figures::FigureStore;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// Session registry (shared across all requests).
    registry: Arc<SessionRegistry>,

    /// Where rendered figures are written and served from.
    figures: Arc<FigureStore>,
}

impl AppState {
    /// Create state around an existing registry.
    pub fn new(registry: Arc<SessionRegistry>, figures: FigureStore) -> Self {
        Self {
            registry,
            figures: Arc::new(figures),
        }
    }

    /// Create state with a registry that starts real interpreters.
    pub fn from_config(config: &RuntimeConfig, figures_dir: impl Into<PathBuf>) -> Self {
        Self::new(
            Arc::new(SessionRegistry::new(config.clone())),
            FigureStore::new(figures_dir),
        )
    }

    /// Get the session registry.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Get a shared handle to the session registry.
    pub fn registry_handle(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the figure store.
    pub fn figures(&self) -> &FigureStore {
        &self.figures
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sessions_count", &self.registry.list().sessions.len())
            .field("figures_dir", &self.figures.dir())
            .finish_non_exhaustive()
    }
}

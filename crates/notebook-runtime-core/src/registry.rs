//! The session registry.
//!
//! [`SessionRegistry`] owns every live [`Session`] and the active-session
//! pointer. The id map and the pointer sit behind one lock that is only held
//! for map bookkeeping, never across an interpreter call, so registry
//! operations do not wait on execute calls in flight.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, instrument, warn};

use notebook_runtime_common::{RuntimeConfig, SessionError};

use crate::engine::ExecutionEngine;
use crate::history::CellHistory;
use crate::kernel::{KernelFactory, ProcessKernelFactory};
use crate::result::ExecutionResult;
use crate::session::{Session, SessionInfo};
use crate::validate::ExecuteRequest;

/// Active session id plus every registered id, in lexicographic order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListing {
    pub active: Option<String>,
    pub sessions: Vec<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    sessions: BTreeMap<String, Arc<Session>>,
    active: Option<String>,
}

/// Owns sessions and tracks the active one.
pub struct SessionRegistry {
    config: RuntimeConfig,
    factory: Arc<dyn KernelFactory>,
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    /// Create a registry that starts real interpreter processes.
    pub fn new(config: RuntimeConfig) -> Self {
        let factory = Arc::new(ProcessKernelFactory::from_config(&config));
        Self::with_factory(config, factory)
    }

    /// Create a registry that starts kernels through `factory`.
    pub fn with_factory(config: RuntimeConfig, factory: Arc<dyn KernelFactory>) -> Self {
        Self {
            config,
            factory,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Start a session and make it active.
    ///
    /// `path` defaults to the configured notebook path in the working
    /// directory, `kind` to the configured default interpreter. A dead
    /// session with the same id is replaced.
    ///
    /// # Errors
    ///
    /// - [`SessionError::DuplicateSession`] if a live session has this id.
    /// - [`SessionError::InvalidConfig`] if `kind` is not configured.
    /// - [`SessionError::Spawn`] if the interpreter could not be started.
    #[instrument(skip(self, path))]
    pub async fn create(
        &self,
        id: &str,
        path: Option<PathBuf>,
        kind: Option<&str>,
    ) -> Result<SessionInfo, SessionError> {
        if id.trim().is_empty() {
            return Err(SessionError::validation("session id must not be empty"));
        }
        self.ensure_vacant(id)?;

        let kind = kind.unwrap_or(&self.config.kernel.default_kind).to_string();
        let backing_path = self.config.history.resolve_path(path.as_deref())?;
        let language = self
            .config
            .kernel
            .spec(&kind)
            .map_or("python", |spec| spec.language.as_str());

        let kernel = self.factory.spawn(id, &kind).await?;
        let history = CellHistory::new(&backing_path, &kind, language);
        let engine = ExecutionEngine::new(id, kernel, history, &self.config);
        let session = Arc::new(Session::new(id, backing_path, kind, engine));

        // Another create for this id may have finished while we were spawning.
        let inserted = {
            let mut inner = self.inner.lock();
            match inner.sessions.get(id) {
                Some(existing) if !existing.is_dead() => false,
                _ => {
                    inner.sessions.insert(id.to_string(), Arc::clone(&session));
                    inner.active = Some(id.to_string());
                    true
                }
            }
        };
        if !inserted {
            if let Err(err) = session.shutdown().await {
                warn!(session_id = id, error = %err, "Failed to stop losing duplicate session");
            }
            return Err(SessionError::duplicate_session(id));
        }

        let info = session.info();
        info!(
            session_id = id,
            kind = %info.kind,
            path = %info.backing_path.display(),
            pid = ?info.pid,
            "Session created"
        );
        Ok(info)
    }

    /// Make `id` the active session.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownSession`] if `id` is not registered.
    /// - [`SessionError::SessionDead`] if its interpreter is gone.
    pub fn switch(&self, id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get(id) {
            None => Err(SessionError::unknown_session(id)),
            Some(session) if session.is_dead() => Err(SessionError::session_dead(id)),
            Some(_) => {
                inner.active = Some(id.to_string());
                info!(session_id = id, "Active session switched");
                Ok(())
            }
        }
    }

    pub fn list(&self) -> SessionListing {
        let inner = self.inner.lock();
        SessionListing {
            active: inner.active.clone(),
            sessions: inner.sessions.keys().cloned().collect(),
        }
    }

    /// Shut down `id`, or the active session if `id` is `None`.
    ///
    /// The record is unregistered first, then the interpreter is terminated.
    /// Shutting down the active session clears the active pointer. Returns
    /// the id that was shut down.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NoActiveSession`] if `id` is `None` and nothing is active.
    /// - [`SessionError::UnknownSession`] if `id` is not registered.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, id: Option<&str>) -> Result<String, SessionError> {
        let (id, session) = {
            let mut inner = self.inner.lock();
            let id = match id {
                Some(id) => id.to_string(),
                None => inner.active.clone().ok_or(SessionError::NoActiveSession)?,
            };
            let session = inner
                .sessions
                .remove(&id)
                .ok_or_else(|| SessionError::unknown_session(&id))?;
            if inner.active.as_deref() == Some(id.as_str()) {
                inner.active = None;
            }
            (id, session)
        };

        if let Err(err) = session.shutdown().await {
            warn!(session_id = %id, error = %err, "Session did not shut down cleanly");
        }
        drop(session);

        info!(session_id = %id, "Session shut down");
        Ok(id)
    }

    /// Shut down every session. Used when the process exits.
    pub async fn shutdown_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock();
            inner.active = None;
            std::mem::take(&mut inner.sessions).into_values().collect()
        };

        let count = sessions.len();
        for session in sessions {
            if let Err(err) = session.shutdown().await {
                warn!(session_id = session.id(), error = %err, "Session did not shut down cleanly");
            }
        }
        if count > 0 {
            info!(count, "All sessions shut down");
        }
        count
    }

    /// Look up a registered session.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.inner
            .lock()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::unknown_session(id))
    }

    /// The active session.
    pub fn active(&self) -> Result<Arc<Session>, SessionError> {
        let inner = self.inner.lock();
        let id = inner.active.as_deref().ok_or(SessionError::NoActiveSession)?;
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::unknown_session(id))
    }

    /// `target`, or the active session if `target` is `None`.
    pub fn resolve(&self, target: Option<&str>) -> Result<Arc<Session>, SessionError> {
        match target {
            Some(id) => self.get(id),
            None => self.active(),
        }
    }

    /// Run a code unit on `target`, or on the active session.
    ///
    /// # Errors
    ///
    /// Lookup errors from [`SessionRegistry::resolve`], then anything
    /// [`Session::execute`] returns.
    pub async fn execute(
        &self,
        target: Option<&str>,
        request: &ExecuteRequest,
    ) -> Result<ExecutionResult, SessionError> {
        let session = self.resolve(target)?;
        session.execute(request).await
    }

    fn ensure_vacant(&self, id: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        match inner.sessions.get(id) {
            Some(existing) if existing.is_dead() => {
                inner.sessions.remove(id);
                info!(session_id = id, "Reaped dead session");
                Ok(())
            }
            Some(_) => Err(SessionError::duplicate_session(id)),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listing = self.list();
        f.debug_struct("SessionRegistry")
            .field("active", &listing.active)
            .field("sessions", &listing.sessions)
            .finish_non_exhaustive()
    }
}

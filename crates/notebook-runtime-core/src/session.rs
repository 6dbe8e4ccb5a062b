//! A registered session: one engine plus the metadata the registry reports.
//!
//! Execute calls are queued on the engine lock, so a session runs one code
//! unit at a time. Once a call holds the lock it runs on its own task and
//! finishes even if the caller stops waiting. Metadata lives behind a
//! separate short-lived lock and can be read while an execute call is in
//! flight.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use notebook_runtime_common::{KernelError, SessionError};

use crate::engine::{ExecutionEngine, KillSwitch};
use crate::history::Cell;
use crate::result::ExecutionResult;
use crate::validate::ExecuteRequest;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The interpreter is running and accepts execute calls.
    Live,
    /// The interpreter was shut down or failed. Terminal.
    Dead,
}

/// Point-in-time description of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub backing_path: PathBuf,
    pub kind: String,
    pub state: SessionState,
    pub execution_count: u64,
    pub history_len: usize,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct SessionStats {
    state: SessionState,
    execution_count: u64,
    history_len: usize,
}

/// One interpreter bound to an id.
#[derive(Debug)]
pub struct Session {
    id: String,
    backing_path: PathBuf,
    kind: String,
    pid: Option<u32>,
    engine: Arc<tokio::sync::Mutex<ExecutionEngine>>,
    stats: Arc<Mutex<SessionStats>>,
    kill_switch: KillSwitch,
    shutdown_grace: Duration,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        backing_path: impl Into<PathBuf>,
        kind: impl Into<String>,
        engine: ExecutionEngine,
    ) -> Self {
        let stats = SessionStats {
            state: SessionState::Live,
            execution_count: engine.execution_count(),
            history_len: engine.history().len(),
        };
        Self {
            id: id.into(),
            backing_path: backing_path.into(),
            kind: kind.into(),
            pid: engine.pid(),
            kill_switch: engine.kill_switch(),
            shutdown_grace: engine.shutdown_grace(),
            engine: Arc::new(tokio::sync::Mutex::new(engine)),
            stats: Arc::new(Mutex::new(stats)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn backing_path(&self) -> &Path {
        &self.backing_path
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Run a code unit, waiting for any in-flight call on this session first.
    ///
    /// Dropping the returned future while waiting for the lock withdraws the
    /// call. Dropping it later does not: the code unit still runs to
    /// completion and is counted and recorded as usual.
    ///
    /// # Errors
    ///
    /// See [`ExecutionEngine::execute`].
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<ExecutionResult, SessionError> {
        if self.is_dead() {
            return Err(SessionError::session_dead(&self.id));
        }

        let mut engine = Arc::clone(&self.engine).lock_owned().await;
        let stats = Arc::clone(&self.stats);
        let request = request.clone();
        let task = tokio::spawn(async move {
            let outcome = engine.execute(&request).await;
            sync_stats(&stats, &engine);
            outcome
        });

        task.await.map_err(|err| {
            SessionError::unavailable(
                &self.id,
                KernelError::protocol(format!("execute task failed: {err}")),
            )
        })?
    }

    /// Terminate the interpreter. The session is dead afterwards.
    ///
    /// An in-flight execute call gets the shutdown grace period to finish;
    /// after that the kernel is killed and the call fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the interpreter could not be terminated.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.stats.lock().state = SessionState::Dead;

        let mut engine = match tokio::time::timeout(self.shutdown_grace, self.engine.lock()).await {
            Ok(engine) => engine,
            Err(_) => {
                warn!(
                    session_id = %self.id,
                    grace_ms = self.shutdown_grace.as_millis(),
                    "Execute call still running after grace period, killing kernel"
                );
                self.kill_switch.kill();
                self.engine.lock().await
            }
        };
        let outcome = engine.shutdown().await;
        sync_stats(&self.stats, &engine);
        outcome
    }

    /// Current metadata; never waits on an execute call.
    pub fn info(&self) -> SessionInfo {
        let stats = *self.stats.lock();
        SessionInfo {
            id: self.id.clone(),
            backing_path: self.backing_path.clone(),
            kind: self.kind.clone(),
            state: stats.state,
            execution_count: stats.execution_count,
            history_len: stats.history_len,
            pid: self.pid,
        }
    }

    /// Recorded cells, in order.
    pub async fn history(&self) -> Vec<Cell> {
        self.engine.lock().await.history().cells().to_vec()
    }

    pub fn is_dead(&self) -> bool {
        self.stats.lock().state == SessionState::Dead
    }
}

fn sync_stats(stats: &Mutex<SessionStats>, engine: &ExecutionEngine) {
    let mut stats = stats.lock();
    stats.execution_count = engine.execution_count();
    stats.history_len = engine.history().len();
    if engine.is_dead() {
        stats.state = SessionState::Dead;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use notebook_runtime_common::{KernelError, RuntimeConfig};

    use super::*;
    use crate::history::CellHistory;
    use crate::testing::{Script, ScriptedKernel};

    fn session(script: &Script) -> Session {
        let mut config = RuntimeConfig::default();
        config.history.persist = false;
        session_with(script, &config)
    }

    fn session_with(script: &Script, config: &RuntimeConfig) -> Session {
        let engine = ExecutionEngine::new(
            "nb",
            Box::new(ScriptedKernel::new(script.clone())),
            CellHistory::new("nb.ipynb", "python3", "python"),
            config,
        );
        Session::new("nb", "nb.ipynb", "python3", engine)
    }

    #[tokio::test]
    async fn test_info_tracks_engine() {
        let script = Script::default();
        let session = session(&script);

        session.execute(&ExecuteRequest::step("a = 1")).await.unwrap();
        session.execute(&ExecuteRequest::probe("a")).await.unwrap();
        let info = session.info();

        assert_eq!(info.id, "nb");
        assert_eq!(info.state, SessionState::Live);
        assert_eq!(info.execution_count, 2);
        assert_eq!(info.history_len, 1);
        assert_eq!(info.pid, Some(4242));
        assert_eq!(session.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_marks_dead() {
        let script = Script::default();
        script.push_failure(KernelError::Timeout { duration_ms: 10 });
        let session = session(&script);

        let err = session.execute(&ExecuteRequest::probe("while True: pass")).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionUnavailable { .. }));
        assert_eq!(session.info().state, SessionState::Dead);

        let err = session.execute(&ExecuteRequest::probe("1")).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionDead { .. }));
    }

    #[tokio::test]
    async fn test_calls_are_serialized() {
        let script = Script::default();
        script.set_delay(Duration::from_millis(50));
        let session = Arc::new(session(&script));

        let start = Instant::now();
        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.execute(&ExecuteRequest::probe("a = 1")).await }
        });
        let second = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.execute(&ExecuteRequest::probe("b = 2")).await }
        });
        let mut counts = vec![
            first.await.unwrap().unwrap().execution_count,
            second.await.unwrap().unwrap().execution_count,
        ];
        counts.sort_unstable();

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let script = Script::default();
        let session = session(&script);

        session.shutdown().await.unwrap();

        assert!(session.is_dead());
        assert_eq!(script.shutdowns(), 1);
        assert!(session.execute(&ExecuteRequest::probe("1")).await.is_err());
    }

    #[tokio::test]
    async fn test_abandoned_call_still_completes() {
        let script = Script::default();
        script.set_delay(Duration::from_millis(200));
        let session = session(&script);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            session.execute(&ExecuteRequest::step("big = load()")),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let info = session.info();
        assert_eq!(info.state, SessionState::Live);
        assert_eq!(info.execution_count, 1);
        assert_eq!(info.history_len, 1);

        let next = session.execute(&ExecuteRequest::probe("big")).await.unwrap();
        assert_eq!(next.execution_count, 2);
        assert_eq!(script.kills(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_kills_running_call_after_grace() {
        let script = Script::default();
        script.set_delay(Duration::from_secs(30));
        let mut config = RuntimeConfig::default();
        config.history.persist = false;
        config.execution.shutdown_grace_ms = 100;
        let session = Arc::new(session_with(&script, &config));

        let running = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.execute(&ExecuteRequest::probe("import time; time.sleep(30)")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let start = Instant::now();
        session.shutdown().await.unwrap();

        assert!(start.elapsed() < Duration::from_secs(2));
        let err = running.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::SessionUnavailable {
                source: KernelError::Killed,
                ..
            }
        ));
        assert!(session.is_dead());
        assert_eq!(script.kills(), 1);
        assert_eq!(script.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_short_call() {
        let script = Script::default();
        script.set_delay(Duration::from_millis(50));
        let session = Arc::new(session(&script));

        let running = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.execute(&ExecuteRequest::probe("a = 1")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.shutdown().await.unwrap();

        assert!(running.await.unwrap().unwrap().is_success());
        assert_eq!(script.kills(), 0);
    }
}

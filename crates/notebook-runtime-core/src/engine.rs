//! The per-session execution engine.
//!
//! [`ExecutionEngine`] owns one kernel and runs code units against it one at
//! a time. It validates requests, times each round trip, records history,
//! and turns kernel failures into a terminal dead state.
//!
//! Snapshotting and restoring protected variables happens inside the
//! interpreter, in the same call as the code unit, so the restore has
//! completed by the time the reply arrives.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use notebook_runtime_common::{HistoryPolicy, KernelError, RuntimeConfig, SessionError};

use crate::history::{Cell, CellHistory};
use crate::kernel::KernelTransport;
use crate::protocol::KernelOp;
use crate::result::ExecutionResult;
use crate::validate::ExecuteRequest;

/// Aborts the in-flight call of an [`ExecutionEngine`] without taking the
/// engine's lock.
///
/// Once fired, the current call (or the next one) fails with
/// [`KernelError::Killed`] and the kernel is killed.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    tx: Arc<watch::Sender<bool>>,
}

impl KillSwitch {
    fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(false)),
        }
    }

    /// Fire the switch. Idempotent.
    pub fn kill(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_killed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the switch has fired.
    async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|killed| *killed).await.is_err() {
            // The sender lives in `self`, so this never happens.
            std::future::pending::<()>().await;
        }
    }
}

/// Runs code units against one interpreter.
pub struct ExecutionEngine {
    session_id: String,
    kernel: Box<dyn KernelTransport>,
    history: CellHistory,
    policy: HistoryPolicy,
    persist: bool,
    timeout: Duration,
    shutdown_grace: Duration,
    execution_count: u64,
    dead: bool,
    kill_switch: KillSwitch,
}

impl ExecutionEngine {
    /// Create an engine over a started kernel.
    pub fn new(
        session_id: impl Into<String>,
        kernel: Box<dyn KernelTransport>,
        history: CellHistory,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            kernel,
            history,
            policy: config.history.policy,
            persist: config.history.persist,
            timeout: config.execution.timeout(),
            shutdown_grace: config.execution.shutdown_grace(),
            execution_count: 0,
            dead: false,
            kill_switch: KillSwitch::new(),
        }
    }

    /// Run one code unit.
    ///
    /// Interpreter-side failures (parse errors, exceptions, uncopyable
    /// protected variables) are reported in the returned result.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Validation`] if the request is rejected; nothing is
    ///   sent to the interpreter and the execution count is unchanged.
    /// - [`SessionError::SessionDead`] if an earlier call killed the kernel.
    /// - [`SessionError::SessionUnavailable`] if the kernel crashed, timed out,
    ///   or broke protocol during this call. The engine is dead afterwards.
    #[instrument(
        skip(self, request),
        fields(session_id = %self.session_id, add_to_history = request.add_to_history)
    )]
    pub async fn execute(&mut self, request: &ExecuteRequest) -> Result<ExecutionResult, SessionError> {
        if self.dead {
            return Err(SessionError::session_dead(&self.session_id));
        }
        request.validate()?;

        self.execution_count += 1;
        let execution_count = self.execution_count;
        let op = KernelOp::Execute {
            code: request.code.clone(),
            backup: request.backup_vars.clone(),
        };

        let start = Instant::now();
        let call = self.kernel.call(op, self.timeout);
        let reply = tokio::select! {
            reply = call => reply,
            () = self.kill_switch.fired() => Err(KernelError::Killed),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => return Err(self.fail(err).await),
        };
        let elapsed = start.elapsed();

        let result = match ExecutionResult::from_reply(reply, elapsed, execution_count) {
            Ok(result) => result,
            Err(err) => return Err(self.fail(err).await),
        };

        if let Some(err) = &result.error {
            debug!(
                kind = ?err.kind,
                name = %err.name,
                restore_failure = ?err.restore_failure,
                "Code unit failed"
            );
        }
        if request.add_to_history {
            self.record(&request.code, &result);
        }

        info!(
            execution_count,
            elapsed_ms = elapsed.as_millis(),
            memory_delta_bytes = result.memory_stats.delta_bytes,
            success = result.is_success(),
            "Execution complete"
        );

        Ok(result)
    }

    /// Stop the kernel. The engine is dead afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionUnavailable`] if the process could not
    /// be terminated.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        self.dead = true;
        self.kernel
            .shutdown(self.shutdown_grace)
            .await
            .map_err(|err| SessionError::unavailable(&self.session_id, err))
    }

    fn record(&mut self, source: &str, result: &ExecutionResult) {
        let keep = match self.policy {
            HistoryPolicy::SuccessOnly => result.is_success(),
            HistoryPolicy::AllSubmissions => true,
        };
        if !keep {
            return;
        }

        self.history.push(Cell::from_result(source, result));
        if self.persist {
            if let Err(err) = self.history.save() {
                warn!(
                    session_id = %self.session_id,
                    path = %self.history.path().display(),
                    error = %err,
                    "Failed to persist cell history"
                );
            }
        }
    }

    async fn fail(&mut self, err: KernelError) -> SessionError {
        error!(session_id = %self.session_id, error = %err, "Kernel failed, marking session dead");
        self.dead = true;
        if let Err(kill_err) = self.kernel.kill().await {
            debug!(session_id = %self.session_id, error = %kill_err, "Failed to kill kernel");
        }
        SessionError::unavailable(&self.session_id, err)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Submissions that reached the interpreter so far.
    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn history(&self) -> &CellHistory {
        &self.history
    }

    /// Returns `true` once the kernel has been shut down or has failed.
    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn pid(&self) -> Option<u32> {
        self.kernel.pid()
    }

    /// Grace period given to the kernel on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    /// A handle that aborts this engine's in-flight call from outside its lock.
    pub fn kill_switch(&self) -> KillSwitch {
        self.kill_switch.clone()
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("session_id", &self.session_id)
            .field("execution_count", &self.execution_count)
            .field("history_len", &self.history.len())
            .field("dead", &self.dead)
            .finish_non_exhaustive()
    }
}

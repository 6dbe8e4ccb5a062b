//! Interpreter processes.
//!
//! A kernel is one long-lived interpreter child process running the embedded
//! driver. The engine talks to it through [`KernelTransport`], one framed
//! request and one framed reply at a time. [`KernelFactory`] is the seam the
//! registry uses to start kernels, so tests can substitute a scripted one.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use notebook_runtime_common::{KernelConfig, KernelError, KernelSpec, RuntimeConfig, SessionError};

use crate::protocol::{KernelOp, KernelReply, KernelRequest};

/// Source of the interpreter-side driver, passed to the interpreter with `-c`.
pub const DRIVER_SOURCE: &str = include_str!("driver.py");

/// A connection to one interpreter.
#[async_trait]
pub trait KernelTransport: Send + Sync {
    /// Send `op` and wait up to `timeout` for its reply.
    ///
    /// Any error leaves the kernel in an unknown state; callers must not
    /// reuse it.
    async fn call(&mut self, op: KernelOp, timeout: Duration) -> Result<KernelReply, KernelError>;

    /// Ask the interpreter to exit, killing it if it is still running after
    /// `grace`.
    async fn shutdown(&mut self, grace: Duration) -> Result<(), KernelError>;

    /// Terminate the interpreter immediately.
    async fn kill(&mut self) -> Result<(), KernelError>;

    /// OS process id, if the kernel is a live process.
    fn pid(&self) -> Option<u32>;
}

/// Starts kernels for new sessions.
#[async_trait]
pub trait KernelFactory: Send + Sync {
    /// Start a kernel of interpreter `kind` for `session_id`.
    async fn spawn(
        &self,
        session_id: &str,
        kind: &str,
    ) -> Result<Box<dyn KernelTransport>, SessionError>;
}

/// An interpreter child process speaking the line protocol over its stdio.
pub struct ProcessKernel {
    session_id: String,
    program: String,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: u64,
    stderr_task: JoinHandle<()>,
}

impl ProcessKernel {
    /// Launch `spec` and wait for the driver's handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the program cannot be launched or the driver does
    /// not answer a ping within `startup_timeout`.
    pub async fn spawn(
        session_id: &str,
        spec: &KernelSpec,
        startup_timeout: Duration,
    ) -> Result<Self, KernelError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .arg("-c")
            .arg(DRIVER_SOURCE)
            .env("MPLBACKEND", "Agg")
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| KernelError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KernelError::protocol("kernel stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KernelError::protocol("kernel stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| KernelError::protocol("kernel stderr was not captured"))?;

        let stderr_task = tokio::spawn(forward_stderr(session_id.to_string(), stderr));

        let mut kernel = Self {
            session_id: session_id.to_string(),
            program: spec.program.clone(),
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
            stderr_task,
        };

        if let Err(err) = kernel.call(KernelOp::Ping, startup_timeout).await {
            warn!(session_id, program = %spec.program, error = %err, "Kernel handshake failed");
            if let Err(kill_err) = kernel.kill().await {
                debug!(session_id, error = %kill_err, "Failed to kill kernel after handshake");
            }
            return Err(err);
        }

        info!(
            session_id,
            program = %spec.program,
            pid = ?kernel.pid(),
            "Kernel started"
        );

        Ok(kernel)
    }

    async fn exchange(&mut self, request: &KernelRequest) -> Result<KernelReply, KernelError> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| KernelError::protocol(format!("failed to encode request: {e}")))?;
        line.push('\n');

        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        self.read_reply(request.id).await
    }

    async fn read_reply(&mut self, id: u64) -> Result<KernelReply, KernelError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line).await? == 0 {
                return Err(KernelError::Exited {
                    code: self.exit_code().await,
                });
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let reply: KernelReply = serde_json::from_str(trimmed)
                .map_err(|e| KernelError::protocol(format!("undecodable reply: {e}")))?;
            if reply.id < id {
                debug!(
                    session_id = %self.session_id,
                    stale_id = reply.id,
                    expected_id = id,
                    "Skipping reply to an earlier request"
                );
                continue;
            }
            if reply.id != id {
                return Err(KernelError::protocol(format!(
                    "reply id {} does not match request id {id}",
                    reply.id
                )));
            }
            return Ok(reply);
        }
    }

    /// Exit code of a process whose stdout has closed.
    async fn exit_code(&mut self) -> Option<i32> {
        match tokio::time::timeout(Duration::from_millis(500), self.child.wait()).await {
            Ok(Ok(status)) => status.code(),
            _ => None,
        }
    }
}

#[async_trait]
impl KernelTransport for ProcessKernel {
    async fn call(&mut self, op: KernelOp, timeout: Duration) -> Result<KernelReply, KernelError> {
        let request = KernelRequest {
            id: self.next_id,
            op,
        };
        self.next_id += 1;

        match tokio::time::timeout(timeout, self.exchange(&request)).await {
            Ok(result) => result,
            Err(_) => Err(KernelError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn shutdown(&mut self, grace: Duration) -> Result<(), KernelError> {
        if let Err(err) = self.call(KernelOp::Shutdown, grace).await {
            debug!(session_id = %self.session_id, error = %err, "Kernel did not acknowledge shutdown");
        }

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(session_id = %self.session_id, code = ?status.code(), "Kernel exited");
                Ok(())
            }
            Ok(Err(err)) => {
                warn!(session_id = %self.session_id, error = %err, "Failed to wait for kernel");
                self.kill().await
            }
            Err(_) => {
                warn!(
                    session_id = %self.session_id,
                    grace_ms = grace.as_millis(),
                    "Kernel still running after grace period, killing"
                );
                self.kill().await
            }
        }
    }

    async fn kill(&mut self) -> Result<(), KernelError> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        self.child.kill().await?;
        debug!(session_id = %self.session_id, "Kernel killed");
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

impl Drop for ProcessKernel {
    fn drop(&mut self) {
        self.stderr_task.abort();
    }
}

impl fmt::Debug for ProcessKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessKernel")
            .field("session_id", &self.session_id)
            .field("program", &self.program)
            .field("pid", &self.child.id())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

/// Interpreter output written outside any captured execute call.
async fn forward_stderr(session_id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => warn!(session_id = %session_id, "kernel stderr: {line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(session_id = %session_id, error = %err, "Kernel stderr closed");
                break;
            }
        }
    }
}

/// Starts [`ProcessKernel`]s from the configured interpreter kinds.
#[derive(Debug, Clone)]
pub struct ProcessKernelFactory {
    kernels: KernelConfig,
    startup_timeout: Duration,
}

impl ProcessKernelFactory {
    /// Create a factory over `kernels`.
    pub fn new(kernels: KernelConfig, startup_timeout: Duration) -> Self {
        Self {
            kernels,
            startup_timeout,
        }
    }

    /// Create a factory from the runtime configuration.
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.kernel.clone(), config.execution.startup_timeout())
    }
}

#[async_trait]
impl KernelFactory for ProcessKernelFactory {
    async fn spawn(
        &self,
        session_id: &str,
        kind: &str,
    ) -> Result<Box<dyn KernelTransport>, SessionError> {
        let spec = self.kernels.spec(kind).ok_or_else(|| {
            SessionError::invalid_config(format!("unknown interpreter kind '{kind}'"))
        })?;

        let kernel = ProcessKernel::spawn(session_id, spec, self.startup_timeout)
            .await
            .map_err(|source| SessionError::Spawn {
                session_id: session_id.to_string(),
                source,
            })?;

        Ok(Box::new(kernel))
    }
}

//! Scripted kernels for tests.
//!
//! A [`Script`] is a shared queue of canned replies plus a log of what the
//! engine sent. Clone it before handing a [`ScriptedKernel`] to an engine to
//! keep a handle for assertions.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use notebook_runtime_common::{KernelError, SessionError};

use crate::kernel::{KernelFactory, KernelTransport};
use crate::protocol::{KernelOp, KernelReply};

#[derive(Debug, Default)]
struct ScriptState {
    replies: VecDeque<Result<KernelReply, KernelError>>,
    calls: Vec<KernelOp>,
    delay: Option<Duration>,
    shutdowns: usize,
    kills: usize,
}

/// Canned replies and a record of calls, shared between a test and a kernel.
#[derive(Debug, Clone, Default)]
pub struct Script {
    state: Arc<Mutex<ScriptState>>,
}

impl Script {
    /// Queue a reply. Calls beyond the queue get [`replies::ok`].
    pub fn push(&self, reply: KernelReply) {
        self.state.lock().replies.push_back(Ok(reply));
    }

    /// Queue a kernel failure.
    pub fn push_failure(&self, err: KernelError) {
        self.state.lock().replies.push_back(Err(err));
    }

    /// Sleep this long before answering each call.
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Operations received so far.
    pub fn calls(&self) -> Vec<KernelOp> {
        self.state.lock().calls.clone()
    }

    pub fn shutdowns(&self) -> usize {
        self.state.lock().shutdowns
    }

    pub fn kills(&self) -> usize {
        self.state.lock().kills
    }
}

/// A kernel that answers from a [`Script`].
#[derive(Debug)]
pub struct ScriptedKernel {
    script: Script,
    pid: u32,
}

impl ScriptedKernel {
    pub fn new(script: Script) -> Self {
        Self::with_pid(script, 4242)
    }

    pub fn with_pid(script: Script, pid: u32) -> Self {
        Self { script, pid }
    }
}

#[async_trait]
impl KernelTransport for ScriptedKernel {
    async fn call(&mut self, op: KernelOp, _timeout: Duration) -> Result<KernelReply, KernelError> {
        let (next, delay) = {
            let mut state = self.script.state.lock();
            state.calls.push(op);
            (state.replies.pop_front(), state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        next.unwrap_or_else(|| Ok(replies::ok()))
    }

    async fn shutdown(&mut self, _grace: Duration) -> Result<(), KernelError> {
        self.script.state.lock().shutdowns += 1;
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), KernelError> {
        self.script.state.lock().kills += 1;
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

/// Hands out [`ScriptedKernel`]s, one [`Script`] per session id.
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    scripts: Mutex<HashMap<String, Script>>,
    spawns: Mutex<Vec<(String, String)>>,
    fail_next: Mutex<bool>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The script behind the most recent kernel spawned for `session_id`.
    pub fn script(&self, session_id: &str) -> Script {
        self.scripts
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// `(session_id, kind)` of every spawn so far.
    pub fn spawns(&self) -> Vec<(String, String)> {
        self.spawns.lock().clone()
    }

    /// Make the next spawn fail as if the interpreter could not be launched.
    pub fn fail_next_spawn(&self) {
        *self.fail_next.lock() = true;
    }
}

#[async_trait]
impl KernelFactory for ScriptedFactory {
    async fn spawn(
        &self,
        session_id: &str,
        kind: &str,
    ) -> Result<Box<dyn KernelTransport>, SessionError> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(SessionError::Spawn {
                session_id: session_id.to_string(),
                source: KernelError::Exited { code: Some(1) },
            });
        }

        let pid = {
            let mut spawns = self.spawns.lock();
            spawns.push((session_id.to_string(), kind.to_string()));
            u32::try_from(spawns.len()).unwrap_or(u32::MAX) + 1000
        };
        // A fresh script per spawn, so a recreated session starts clean.
        let script = Script::default();
        self.scripts
            .lock()
            .insert(session_id.to_string(), script.clone());

        Ok(Box::new(ScriptedKernel::with_pid(script, pid)))
    }
}

/// Builders for canned replies.
pub mod replies {
    use std::collections::BTreeMap;

    use serde_json::Value;

    use crate::protocol::{
        KernelReply, MemorySample, OutputEvent, ReplyStatus, StreamName, WireError,
    };

    const BEFORE: u64 = 100 * 1024 * 1024;
    const AFTER: u64 = 101 * 1024 * 1024;

    /// A successful execute reply with no output.
    pub fn ok() -> KernelReply {
        with_status(ReplyStatus::Ok)
    }

    /// An execute reply with `status` and a memory sample.
    pub fn with_status(status: ReplyStatus) -> KernelReply {
        KernelReply {
            status,
            memory: Some(MemorySample {
                before: BEFORE,
                after: AFTER,
            }),
            ..KernelReply::ack(0)
        }
    }

    /// A runtime failure raising `ename(evalue)`.
    pub fn error(ename: &str, evalue: &str) -> KernelReply {
        KernelReply {
            error: Some(WireError {
                ename: ename.to_string(),
                evalue: evalue.to_string(),
                traceback: vec![format!("{ename}: {evalue}")],
            }),
            ..with_status(ReplyStatus::Error)
        }
    }

    /// A successful reply that printed `text`.
    pub fn stdout(text: &str) -> KernelReply {
        KernelReply {
            events: vec![OutputEvent::Stream {
                name: StreamName::Stdout,
                text: text.to_string(),
            }],
            ..ok()
        }
    }

    /// A successful reply carrying one display payload.
    pub fn display(mime: &str, payload: &str) -> KernelReply {
        KernelReply {
            events: vec![OutputEvent::Display {
                data: BTreeMap::from([(mime.to_string(), Value::String(payload.to_string()))]),
            }],
            ..ok()
        }
    }
}

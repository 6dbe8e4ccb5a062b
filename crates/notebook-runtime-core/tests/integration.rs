//! Integration tests for notebook-runtime-core.
//!
//! These tests run real `python3` interpreters and verify:
//! - Variable backup and restore across a failed code unit
//! - Timing and memory on every outcome
//! - Output and display capture
//! - History isolation and notebook persistence
//! - Registry lifecycle with live processes
//! - Abandoned calls and shutdown of a running cell
//!
//! Each test returns early when `python3` is not on `PATH`.

use std::path::Path;
use std::time::{Duration, Instant};

use notebook_runtime_common::{KernelError, RuntimeConfig, SessionError};
use notebook_runtime_core::{ErrorKind, ExecuteRequest, SessionRegistry, SessionState};

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

fn config(dir: &Path) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.history.default_path = dir.join("ab_notebook.ipynb");
    config
}

async fn registry_with_session(dir: &Path) -> SessionRegistry {
    let registry = SessionRegistry::new(config(dir));
    registry.create("main", None, None).await.unwrap();
    registry
}

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
    };
}

// ============================================================================
// Test: Backup and Restore
// ============================================================================

#[tokio::test]
async fn test_restore_after_failure() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    registry
        .execute(None, &ExecuteRequest::step("my_list = [1, 2, 3]"))
        .await
        .unwrap();

    let request = ExecuteRequest::step("my_list.append(4)").with_backup(["my_list"]);
    assert!(registry.execute(None, &request).await.unwrap().is_success());

    let request = ExecuteRequest::step("my_list.append(5)\nraise Exception('trigger error')")
        .with_backup(["my_list"]);
    let result = registry.execute(None, &request).await.unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Runtime);
    assert_eq!(error.name, "Exception");
    assert_eq!(error.message, "trigger error");
    assert!(error.restore_failure.is_none());

    let result = registry
        .execute(None, &ExecuteRequest::probe("my_list"))
        .await
        .unwrap();
    assert_eq!(result.result.as_deref(), Some("[1, 2, 3, 4]"));

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_restore_removes_new_binding() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    let request = ExecuteRequest::probe("fresh = 1\n1 / 0").with_backup(["fresh"]);
    let result = registry.execute(None, &request).await.unwrap();
    assert_eq!(result.error.unwrap().name, "ZeroDivisionError");

    let result = registry
        .execute(None, &ExecuteRequest::probe("'fresh' in globals()"))
        .await
        .unwrap();
    assert_eq!(result.result.as_deref(), Some("False"));

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_uncopyable_backup_does_not_run() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    registry
        .execute(None, &ExecuteRequest::probe("gen = (i for i in range(3))\nran = False"))
        .await
        .unwrap();
    let request = ExecuteRequest::probe("ran = True\nnext(gen)").with_backup(["gen"]);
    let result = registry.execute(None, &request).await.unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::Backup));

    let result = registry
        .execute(None, &ExecuteRequest::probe("ran"))
        .await
        .unwrap();
    assert_eq!(result.result.as_deref(), Some("False"));

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_missing_snapshot_reported_with_original_error() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    registry
        .execute(None, &ExecuteRequest::probe("x = [1]"))
        .await
        .unwrap();
    let request = ExecuteRequest::probe(
        "x.append(2)\ndel globals()['__nbrt_' + 'snapshot__']\nraise ValueError('boom')",
    )
    .with_backup(["x"]);
    let result = registry.execute(None, &request).await.unwrap();

    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Runtime);
    assert_eq!(error.name, "ValueError");
    assert_eq!(error.message, "boom");
    assert!(
        error
            .restore_failure
            .as_deref()
            .is_some_and(|reason| reason.starts_with("snapshot slot missing"))
    );
    assert!(result.timing.seconds >= 0.0);

    let result = registry
        .execute(None, &ExecuteRequest::probe("x"))
        .await
        .unwrap();
    assert_eq!(result.result.as_deref(), Some("[1, 2]"));

    registry.shutdown_all().await;
}

// ============================================================================
// Test: Metrics and Validation
// ============================================================================

#[tokio::test]
async fn test_metrics_on_every_outcome() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    for code in ["x = 1", "raise ValueError('bad')", "print("] {
        let result = registry
            .execute(None, &ExecuteRequest::probe(code))
            .await
            .unwrap();
        assert!(result.timing.seconds >= 0.0, "{code}");
        assert!(result.memory_stats.before_bytes > 0, "{code}");
        assert!(result.memory_stats.after_bytes > 0, "{code}");
    }

    let result = registry
        .execute(None, &ExecuteRequest::probe("print("))
        .await
        .unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Parse);
    assert_eq!(error.name, "SyntaxError");

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_validation_leaves_count_unchanged() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    registry
        .execute(None, &ExecuteRequest::probe("x = [1]"))
        .await
        .unwrap();
    let request = ExecuteRequest::probe("x.append(2)").with_backup(["y"]);
    let err = registry.execute(None, &request).await.unwrap_err();

    assert!(matches!(err, SessionError::Validation { .. }));
    assert_eq!(registry.active().unwrap().info().execution_count, 1);

    registry.shutdown_all().await;
}

// ============================================================================
// Test: Output Capture
// ============================================================================

#[tokio::test]
async fn test_streams_and_result() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    let code = "import sys\nprint('hello')\nprint('careful', file=sys.stderr)\n6 * 7";
    let result = registry
        .execute(None, &ExecuteRequest::probe(code))
        .await
        .unwrap();

    assert_eq!(result.stdout, "hello\n");
    assert_eq!(result.stderr, "careful\n");
    assert_eq!(result.result.as_deref(), Some("42"));
    assert!(result.display_data.is_empty());

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_display_payload_captured() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    let code = r"
class Chart:
    def _repr_png_(self):
        return b'\x89PNG\r\n\x1a\n'

display(Chart())
";
    let result = registry
        .execute(None, &ExecuteRequest::probe(code))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.display_data["image/png"], "iVBORw0KGgo=");
    assert!(result.display_data.contains_key("text/plain"));

    registry.shutdown_all().await;
}

/// Stand-in for `matplotlib.pyplot` with just the calls the driver makes.
const FAKE_PYPLOT: &str = r#"
import sys, types

class FakeFigure:
    def __init__(self, number):
        self.number = number

    def savefig(self, buffer, format=None, bbox_inches=None):
        buffer.write(b"\x89PNG\r\n\x1a\n")

    def __repr__(self):
        return "<FakeFigure %d>" % self.number

open_figures = {}

def figure(number=None):
    if number is None:
        number = len(open_figures) + 1
    return open_figures.setdefault(number, FakeFigure(number))

pyplot = types.ModuleType("matplotlib.pyplot")
pyplot.figure = figure
pyplot.get_fignums = lambda: sorted(open_figures)
pyplot.close = lambda which=None: open_figures.clear()
pyplot.show = lambda *args, **kwargs: None
sys.modules["matplotlib.pyplot"] = pyplot
"#;

#[tokio::test]
async fn test_pyplot_figures_captured() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    registry
        .execute(None, &ExecuteRequest::probe(FAKE_PYPLOT))
        .await
        .unwrap();

    // Rendered by the patched `show`.
    let result = registry
        .execute(
            None,
            &ExecuteRequest::probe("pyplot.figure()\npyplot.show()\nprint('after show')"),
        )
        .await
        .unwrap();
    assert!(result.is_success());
    assert_eq!(result.display_data["image/png"], "iVBORw0KGgo=");
    assert_eq!(result.stdout, "after show\n");

    // Rendered because it was still open at the end of the cell.
    let result = registry
        .execute(None, &ExecuteRequest::probe("pyplot.figure()\nNone"))
        .await
        .unwrap();
    assert_eq!(result.display_data["image/png"], "iVBORw0KGgo=");

    let result = registry
        .execute(None, &ExecuteRequest::probe("pyplot.get_fignums()"))
        .await
        .unwrap();
    assert_eq!(result.result.as_deref(), Some("[]"));
    assert!(result.display_data.is_empty());

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_show_var_echoes_value() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    let request = ExecuteRequest::step("hello = 'hello2'")
        .with_show_var("hello")
        .unwrap();
    let result = registry.execute(None, &request).await.unwrap();

    assert_eq!(result.result.as_deref(), Some("'hello2'"));

    registry.shutdown_all().await;
}

// ============================================================================
// Test: History
// ============================================================================

#[tokio::test]
async fn test_history_isolation_and_persistence() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    registry
        .execute(None, &ExecuteRequest::probe("import math"))
        .await
        .unwrap();
    registry
        .execute(None, &ExecuteRequest::step("area = math.pi * 2 ** 2\nround(area, 2)"))
        .await
        .unwrap();
    registry
        .execute(None, &ExecuteRequest::step("undefined_name"))
        .await
        .unwrap();

    let session = registry.active().unwrap();
    let cells = session.history().await;
    assert_eq!(cells.len(), 1);
    assert!(cells[0].source.starts_with("area ="));

    let written = std::fs::read_to_string(dir.path().join("ab_notebook.ipynb")).unwrap();
    let notebook: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(notebook["cells"].as_array().unwrap().len(), 1);
    assert_eq!(notebook["cells"][0]["outputs"][0]["output_type"], "execute_result");
    assert_eq!(notebook["cells"][0]["outputs"][0]["data"]["text/plain"], "12.57");

    registry.shutdown_all().await;
}

// ============================================================================
// Test: Registry and Failures
// ============================================================================

#[tokio::test]
async fn test_sessions_are_isolated() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = SessionRegistry::new(config(dir.path()));

    registry
        .create("a", Some(dir.path().join("a.ipynb")), None)
        .await
        .unwrap();
    registry
        .create("b", Some(dir.path().join("b.ipynb")), None)
        .await
        .unwrap();
    registry
        .execute(Some("a"), &ExecuteRequest::probe("value = 'a'"))
        .await
        .unwrap();

    let result = registry
        .execute(Some("b"), &ExecuteRequest::probe("value"))
        .await
        .unwrap();
    assert_eq!(result.error.unwrap().name, "NameError");

    let pid_a = registry.get("a").unwrap().info().pid;
    let pid_b = registry.get("b").unwrap().info().pid;
    assert!(pid_a.is_some());
    assert_ne!(pid_a, pid_b);

    registry.switch("a").unwrap();
    assert_eq!(registry.shutdown(None).await.unwrap(), "a");
    let listing = registry.list();
    assert_eq!(listing.active, None);
    assert_eq!(listing.sessions, vec!["b".to_string()]);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_crash_marks_session_dead() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    let err = registry
        .execute(None, &ExecuteRequest::probe("import os\nos._exit(3)"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::SessionUnavailable {
            source: KernelError::Exited { .. } | KernelError::Io(_),
            ..
        }
    ));
    assert_eq!(registry.get("main").unwrap().info().state, SessionState::Dead);

    registry.create("main", None, None).await.unwrap();
    assert!(
        registry
            .execute(None, &ExecuteRequest::probe("1 + 1"))
            .await
            .unwrap()
            .is_success()
    );

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_timeout_marks_session_dead() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.execution.timeout_ms = 300;
    let registry = SessionRegistry::new(config);
    registry.create("main", None, None).await.unwrap();

    let err = registry
        .execute(None, &ExecuteRequest::probe("import time\ntime.sleep(10)"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::SessionUnavailable {
            source: KernelError::Timeout { duration_ms: 300 },
            ..
        }
    ));

    let err = registry
        .execute(None, &ExecuteRequest::probe("1"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SessionDead { .. }));

    tokio::time::timeout(Duration::from_secs(5), registry.shutdown(None))
        .await
        .unwrap()
        .unwrap();
}

// ============================================================================
// Test: Abandoned Calls and Shutdown
// ============================================================================

#[tokio::test]
async fn test_abandoned_call_keeps_session_usable() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with_session(dir.path()).await;

    registry
        .execute(None, &ExecuteRequest::probe("keep = 41"))
        .await
        .unwrap();
    let abandoned = tokio::time::timeout(
        Duration::from_millis(200),
        registry.execute(None, &ExecuteRequest::probe("import time\ntime.sleep(1)")),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let result = registry
        .execute(None, &ExecuteRequest::probe("keep + 1"))
        .await
        .unwrap();
    assert_eq!(result.result.as_deref(), Some("42"));
    assert_eq!(result.execution_count, 3);
    assert_eq!(registry.get("main").unwrap().info().state, SessionState::Live);

    registry.shutdown_all().await;
}

#[tokio::test]
async fn test_shutdown_kills_running_cell_after_grace() {
    require_python!();
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.execution.shutdown_grace_ms = 200;
    let registry = std::sync::Arc::new(SessionRegistry::new(config));
    registry.create("main", None, None).await.unwrap();

    let running = tokio::spawn({
        let registry = std::sync::Arc::clone(&registry);
        async move {
            registry
                .execute(None, &ExecuteRequest::probe("import time\ntime.sleep(6)"))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;

    let start = Instant::now();
    assert_eq!(registry.shutdown(None).await.unwrap(), "main");
    assert!(start.elapsed() < Duration::from_secs(2));

    let err = running.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SessionError::SessionUnavailable {
            source: KernelError::Killed,
            ..
        }
    ));
    assert!(registry.list().sessions.is_empty());
}

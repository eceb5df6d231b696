//! Solver subprocess session (§4.B).
//!
//! Owns a child process and its three pipes. A dedicated background task
//! drains stdout line-by-line into an [`async_channel`] queue consumed by the
//! [`crate::sexpr::SExprReader`]; a parallel task drains stderr, logging each
//! line and forwarding it to the error handler. Only one `await_response` may
//! be in flight at a time per session (enforced by locking the reader), which
//! is the one concurrency contract this module must uphold (§5).

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};

use crate::classifier::{classify, Classification};
use crate::error::{HoudiniError, Result};
use crate::sexpr::{SExpr, SExprReader};

const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const VERBOSE_TRUNCATE_LEN: usize = 50;

/// Three-level traffic logging verbosity (§4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Normal = 1,
    Verbose = 2,
}

/// Receives statistics lines forwarded from `(progress ...)` replies (§4.C).
pub trait Inspector: Send + Sync {
    fn stats_line(&self, line: String);
}

pub struct NoopInspector;
impl Inspector for NoopInspector {
    fn stats_line(&self, _line: String) {}
}

/// Receives hard solver errors and raw stderr lines.
pub trait SessionErrorHandler: Send + Sync {
    fn on_error(&self, message: &str);
    fn on_stderr_line(&self, line: &str);
}

pub struct TracingErrorHandler;
impl SessionErrorHandler for TracingErrorHandler {
    fn on_error(&self, message: &str) {
        tracing::warn!(target: "houdini_core::solver", "solver error: {message}");
    }
    fn on_stderr_line(&self, line: &str) {
        tracing::debug!(target: "houdini_core::solver", "stderr: {line}");
    }
}

/// Global, process-wide total of child user+system CPU time consumed by all
/// solver sessions, in milliseconds. Mirrors the spec's "global mutable
/// counter"; the driver adds to it on session close.
pub static TOTAL_CHILD_CPU_MS: AtomicU64 = AtomicU64::new(0);

/// Process-wide Ctrl-C broadcast, lazily installed on first session
/// registration. Sessions subscribe in [`SolverSession::new`] and
/// deregister by simply letting their subscription drop on disposal.
static CANCEL_BROADCAST: Lazy<broadcast::Sender<()>> = Lazy::new(|| {
    let (tx, _rx) = broadcast::channel(1);
    let tx2 = tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx2.send(());
        }
    });
    tx
});

pub struct SolverSession {
    id: u64,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    reader: Mutex<SExprReader>,
    verbosity: Verbosity,
    inspector: Arc<dyn Inspector>,
    error_handler: Arc<dyn SessionErrorHandler>,
    start_time: std::time::Instant,
    exited: AtomicBool,
    interrupt_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Mirrors every outbound command to this file when set (§4.D/§6
    /// `log_path` config), one line per `send` call.
    log_file: Mutex<Option<File>>,
}

impl SolverSession {
    /// Spawns `path args...` with piped stdio and starts the stdout/stderr
    /// reader tasks.
    pub async fn spawn(
        id: u64,
        path: &str,
        args: &[String],
        verbosity: Verbosity,
        inspector: Arc<dyn Inspector>,
        error_handler: Arc<dyn SessionErrorHandler>,
    ) -> Result<Arc<Self>> {
        Self::spawn_with_log(id, path, args, verbosity, inspector, error_handler, None).await
    }

    /// Same as [`Self::spawn`], but also mirrors every outbound command to
    /// `log_path` (append mode), matching the teacher's traffic-logging
    /// convention for subprocess sessions.
    pub async fn spawn_with_log(
        id: u64,
        path: &str,
        args: &[String],
        verbosity: Verbosity,
        inspector: Arc<dyn Inspector>,
        error_handler: Arc<dyn SessionErrorHandler>,
        log_path: Option<&Path>,
    ) -> Result<Arc<Self>> {
        let mut child = Command::new(path)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HoudiniError::ProcessStartFailure {
                path: path.to_string(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            HoudiniError::ProcessStartFailure {
                path: path.to_string(),
                source: std::io::Error::other("stdout pipe not captured"),
            }
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            HoudiniError::ProcessStartFailure {
                path: path.to_string(),
                source: std::io::Error::other("stderr pipe not captured"),
            }
        })?;

        let (lines_tx, lines_rx) = async_channel::unbounded::<String>();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if lines_tx.send(line).await.is_err() {
                    break;
                }
            }
            // Sender dropped here: the line channel closes, which is the
            // reader's EOF signal.
        });

        let stderr_handler = error_handler.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                stderr_handler.on_stderr_line(&line);
            }
        });

        let log_file = match log_path {
            Some(path) => Some(
                tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?,
            ),
            None => None,
        };

        let session = Arc::new(Self {
            id,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(stdin),
            reader: Mutex::new(SExprReader::new(lines_rx)),
            verbosity,
            inspector,
            error_handler,
            start_time: std::time::Instant::now(),
            exited: AtomicBool::new(false),
            interrupt_task: Mutex::new(None),
            log_file: Mutex::new(log_file),
        });
        session.install_interrupt_handler();
        Ok(session)
    }

    fn install_interrupt_handler(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut cancel_rx = CANCEL_BROADCAST.subscribe();
        let handle = tokio::spawn(async move {
            if cancel_rx.recv().await.is_ok() {
                if let Some(session) = weak.upgrade() {
                    session.request_termination().await;
                }
            }
        });
        // Installed synchronously right after construction; no other task
        // can observe `interrupt_task` before this assignment completes.
        if let Ok(mut slot) = self.interrupt_task.try_lock() {
            *slot = Some(handle);
        }
    }

    async fn request_termination(&self) {
        self.stdin.lock().await.take();
        let mut child_guard = self.child.lock().await;
        if let Some(child) = child_guard.as_mut() {
            let waited = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, child.wait()).await;
            if waited.is_err() {
                let _ = child.start_kill();
            }
        }
        self.exited.store(true, Ordering::SeqCst);
    }

    fn log_outbound(&self, command: &str) {
        match self.verbosity {
            Verbosity::Quiet => {}
            Verbosity::Normal => tracing::debug!(target: "houdini_core::solver", session = self.id, "-> {command}"),
            Verbosity::Verbose => {
                let shown = if command.len() > VERBOSE_TRUNCATE_LEN {
                    format!("{}...", &command[..VERBOSE_TRUNCATE_LEN])
                } else {
                    command.to_string()
                };
                tracing::debug!(target: "houdini_core::solver", session = self.id, "-> {shown}");
            }
        }
    }

    /// Writes `command` to the solver's stdin, appending a newline, and
    /// mirrors it to the session's log file (if any).
    pub async fn send(&self, command: &str) -> Result<()> {
        self.log_outbound(command);
        if let Some(file) = self.log_file.lock().await.as_mut() {
            file.write_all(command.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        let mut guard = self.stdin.lock().await;
        match guard.as_mut() {
            Some(stdin) => {
                stdin.write_all(command.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await?;
                Ok(())
            }
            None => Ok(()), // input already closed; nothing to send
        }
    }

    /// Closes stdin. No further commands may be sent.
    pub async fn indicate_end_of_input(&self) {
        self.stdin.lock().await.take();
    }

    /// Starts a fresh logical problem (e.g. for logging/diagnostics); has no
    /// effect on the underlying process beyond a log marker.
    pub fn new_problem(&self, name: &str) {
        tracing::debug!(target: "houdini_core::solver", session = self.id, "new problem: {name}");
    }

    /// Reads and classifies solver replies until one survives classification
    /// (§4.C), an EOF is observed, or `cancel` fires.
    pub async fn await_response(&self, cancel: &crate::driver::CancellationToken) -> Result<Option<SExpr>> {
        let mut reader = self.reader.lock().await;
        loop {
            if cancel.is_cancelled() {
                return Err(HoudiniError::Cancelled);
            }
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HoudiniError::Cancelled),
                next = reader.read_sexpr() => next,
            };
            match next {
                Err(e) => {
                    self.error_handler.on_error(&e.0);
                    return Ok(None);
                }
                Ok(None) => return Ok(None),
                Ok(Some(expr)) => match classify(&expr, self.inspector.as_ref()) {
                    Classification::Ok(expr) => return Ok(Some(expr)),
                    Classification::Swallowed => continue,
                    Classification::SoftNull => return Ok(None),
                    Classification::Error(msg) => {
                        self.error_handler.on_error(&msg);
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// Closes stdin, waits up to the drain timeout, force-kills if needed,
    /// and folds this child's CPU time into the global accumulator.
    pub async fn close(&self) {
        self.indicate_end_of_input().await;
        let mut child_guard = self.child.lock().await;
        if let Some(mut child) = child_guard.take() {
            let waited = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, child.wait()).await;
            if waited.is_err() {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        self.exited.store(true, Ordering::SeqCst);
        if let Some(task) = self.interrupt_task.lock().await.take() {
            task.abort();
        }
        match read_children_cpu_ms() {
            Some(ms) => {
                TOTAL_CHILD_CPU_MS.fetch_add(ms, Ordering::Relaxed);
            }
            None => {
                tracing::warn!(
                    target: "houdini_core::solver",
                    session = self.id,
                    elapsed_ms = self.start_time.elapsed().as_millis() as u64,
                    "failed to read child CPU time; ignoring"
                );
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(unix)]
fn read_children_cpu_ms() -> Option<u64> {
    // Best-effort, process-wide: RUSAGE_CHILDREN aggregates all reaped
    // children, matching the spec's single global accumulator rather than
    // a precise per-session figure.
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) != 0 {
            return None;
        }
        let user_ms = usage.ru_utime.tv_sec as u64 * 1000 + usage.ru_utime.tv_usec as u64 / 1000;
        let sys_ms = usage.ru_stime.tv_sec as u64 * 1000 + usage.ru_stime.tv_usec as u64 / 1000;
        Some(user_ms + sys_ms)
    }
}

#[cfg(not(unix))]
fn read_children_cpu_ms() -> Option<u64> {
    None
}

//! Managed OS process.
//!
//! # Responsibilities
//! - Spawn one process with an explicit environment (plus `PATH`)
//! - Merge stdout and stderr into one line stream
//! - Expose `started` and `ended` signals
//! - Idempotent termination: interrupt first, kill after a deadline
//!
//! # Design Decisions
//! - Signals are memoized futures, so any number of callers can await them
//! - `ended` fires once output has drained and the process has been reaped
//! - On unix each process leads its own process group, and both signals go
//!   to the whole group so descendants holding the output pipes stop too
//! - A failed spawn still produces a handle whose `started` signal fails

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Notify};

use crate::process::output::{read_lines, LineSink, OutputStream, StreamKind};

/// How long a process must stay up before it counts as started.
pub const STARTED_GRACE: Duration = Duration::from_millis(100);

/// A memoized, cloneable signal.
pub type Signal<T> = Shared<BoxFuture<'static, T>>;

/// The OS refused to create the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to spawn `{program}`: {message}")]
pub struct SpawnError {
    pub program: String,
    pub message: String,
}

/// What to run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Name used in diagnostics.
    pub label: String,
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// The complete environment, apart from `PATH`.
    pub env: BTreeMap<String, String>,
    /// Time between the interrupt signal and a forced kill.
    pub stop_timeout: Duration,
}

/// One spawned OS process.
pub struct ProcessHandle {
    label: String,
    pid: Option<u32>,
    output: Mutex<Option<OutputStream>>,
    started: Signal<Result<(), SpawnError>>,
    ended: Signal<()>,
    is_ended: Arc<AtomicBool>,
    spawn_error: Option<SpawnError>,
    kill: Arc<Notify>,
    terminating: AtomicBool,
    interrupts: AtomicUsize,
    stop_timeout: Duration,
}

impl ProcessHandle {
    /// Spawn the process described by `spec`. Every output line is passed
    /// to `sink` before it reaches the output stream.
    ///
    /// Must be called within a Tokio runtime.
    pub fn spawn(spec: &ProcessSpec, sink: LineSink) -> Self {
        let Some((program, args)) = spec.argv.split_first() else {
            return Self::failed(
                spec,
                SpawnError {
                    program: String::new(),
                    message: "empty command".to_string(),
                },
            );
        };

        let mut command = Command::new(program);
        command.args(args).env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        match command.spawn() {
            Ok(child) => Self::supervise(spec, child, sink),
            Err(e) => Self::failed(
                spec,
                SpawnError {
                    program: program.clone(),
                    message: e.to_string(),
                },
            ),
        }
    }

    fn supervise(spec: &ProcessSpec, mut child: Child, sink: LineSink) -> Self {
        let pid = child.id();
        tracing::debug!(service = %spec.label, pid = ?pid, argv = ?spec.argv, "Spawned process");

        let (merged_tx, mut merged_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, StreamKind::Stdout, merged_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, StreamKind::Stderr, merged_tx.clone()));
        }
        drop(merged_tx);

        let is_ended = Arc::new(AtomicBool::new(false));
        let kill = Arc::new(Notify::new());

        let task = tokio::spawn({
            let label = spec.label.clone();
            let is_ended = is_ended.clone();
            let kill = kill.clone();
            async move {
                let drain = async move {
                    while let Some(line) = merged_rx.recv().await {
                        sink(&line);
                        let _ = output_tx.send(line);
                    }
                };
                let reap = async {
                    let exited = tokio::select! {
                        status = child.wait() => Some(status),
                        _ = kill.notified() => None,
                    };
                    match exited {
                        Some(status) => status,
                        None => {
                            // Still unreaped, so the group id cannot have been reused.
                            if let Some(pid) = pid {
                                if let Err(reason) = kill_group(pid) {
                                    tracing::warn!(service = %label, pid, %reason, "Failed to kill process group");
                                }
                            }
                            if let Err(e) = child.start_kill() {
                                tracing::warn!(service = %label, error = %e, "Failed to kill process");
                            }
                            child.wait().await
                        }
                    }
                };

                let ((), status) = tokio::join!(drain, reap);
                match status {
                    Ok(status) => tracing::debug!(service = %label, %status, "Process ended"),
                    Err(e) => tracing::warn!(service = %label, error = %e, "Failed to reap process"),
                }
                is_ended.store(true, Ordering::SeqCst);
            }
        });

        let ended = async move {
            let _ = task.await;
        }
        .boxed()
        .shared();
        let started = async {
            tokio::time::sleep(STARTED_GRACE).await;
            Ok::<(), SpawnError>(())
        }
        .boxed()
        .shared();

        Self {
            label: spec.label.clone(),
            pid,
            output: Mutex::new(Some(OutputStream::new(output_rx))),
            started,
            ended,
            is_ended,
            spawn_error: None,
            kill,
            terminating: AtomicBool::new(false),
            interrupts: AtomicUsize::new(0),
            stop_timeout: spec.stop_timeout,
        }
    }

    fn failed(spec: &ProcessSpec, error: SpawnError) -> Self {
        tracing::debug!(service = %spec.label, error = %error, "Process could not be spawned");
        Self {
            label: spec.label.clone(),
            pid: None,
            output: Mutex::new(Some(OutputStream::closed())),
            started: future::ready(Err::<(), SpawnError>(error.clone())).boxed().shared(),
            ended: future::ready(()).boxed().shared(),
            is_ended: Arc::new(AtomicBool::new(true)),
            spawn_error: Some(error),
            kill: Arc::new(Notify::new()),
            terminating: AtomicBool::new(false),
            interrupts: AtomicUsize::new(0),
            stop_timeout: spec.stop_timeout,
        }
    }

    /// OS process id, if the process was created.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the merged output stream. Only the first call returns it.
    pub fn take_output(&self) -> Option<OutputStream> {
        self.output.lock().ok()?.take()
    }

    /// Resolves once the process is considered launched, or fails if it
    /// could not be created.
    pub fn started(&self) -> Signal<Result<(), SpawnError>> {
        self.started.clone()
    }

    /// Resolves once the process is gone and its output has drained.
    pub fn ended(&self) -> Signal<()> {
        self.ended.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.is_ended.load(Ordering::SeqCst)
    }

    pub fn spawn_error(&self) -> Option<&SpawnError> {
        self.spawn_error.as_ref()
    }

    /// Number of interrupt signals sent to the process.
    pub fn interrupt_count(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Ask the process to stop.
    ///
    /// The first call sends an interrupt (unless the process already ended)
    /// and arms a forced kill after the stop timeout. Every call returns
    /// the `ended` signal.
    pub fn terminate(&self) -> Signal<()> {
        if !self.terminating.swap(true, Ordering::SeqCst) && !self.is_ended() {
            self.interrupt();

            let ended = self.ended.clone();
            let kill = self.kill.clone();
            let label = self.label.clone();
            let pid = self.pid;
            let timeout = self.stop_timeout;
            tokio::spawn(async move {
                if tokio::time::timeout(timeout, ended).await.is_err() {
                    tracing::warn!(
                        service = %label,
                        timeout_ms = timeout.as_millis() as u64,
                        "Process still running after interrupt, killing"
                    );
                    // The leader may be reaped already while descendants
                    // still hold the pipes open.
                    if let Some(pid) = pid {
                        if let Err(reason) = kill_group(pid) {
                            tracing::warn!(service = %label, pid, %reason, "Failed to kill process group");
                        }
                    }
                    kill.notify_one();
                }
            });
        }
        self.ended.clone()
    }

    fn interrupt(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        match send_interrupt(pid) {
            Ok(()) => tracing::debug!(service = %self.label, pid, "Sent interrupt"),
            Err(reason) => {
                tracing::warn!(service = %self.label, pid, %reason, "Interrupt failed, killing");
                self.kill.notify_one();
            }
        }
    }
}

/// Signal every process in the group led by `pid`. A group that is
/// already gone counts as success.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), String> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<(), String> {
    signal_group(pid, nix::sys::signal::Signal::SIGINT)
}

#[cfg(unix)]
fn kill_group(pid: u32) -> Result<(), String> {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> Result<(), String> {
    Err("graceful interrupt is not supported on this platform".to_string())
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) -> Result<(), String> {
    Ok(())
}

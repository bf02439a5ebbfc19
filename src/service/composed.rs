//! One service of the composite service.
//!
//! # Responsibilities
//! - Own at most one process per service
//! - Run the readiness probe against the process output
//! - Memoize `start` and `stop` so repeated calls share one outcome
//! - Report spawn failures, readiness failures and unexpected exits
//!
//! # Data Flow
//! ```text
//! start() → spawn process → started ∥ readiness probe → Started
//!                         ↘ exit watcher → Fatal(UnexpectedExit)
//! stop()  → interrupt → (kill after timeout) → ended → Stopped
//! ```
//!
//! # Design Decisions
//! - Each service reports at most one fatal error
//! - Nothing is reported once a stop has been requested
//! - A failed start never resolves; the orchestrator tears down instead

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{self, FutureExt, TryFutureExt};

use crate::config::NormalizedServiceConfig;
use crate::process::{LineSink, OutputLine, OutputStream, ProcessHandle, ProcessSpec, Signal};
use crate::ready::{ReadyContext, ReadyProbe};
use crate::service::events::{ServiceError, ServiceEvent, ServiceObserver};

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// Cloneable handle to one managed service.
#[derive(Clone)]
pub struct ComposedService {
    inner: Arc<Inner>,
}

struct Inner {
    config: NormalizedServiceConfig,
    stop_timeout: Duration,
    observers: Mutex<Vec<Arc<dyn ServiceObserver>>>,
    lifecycle: Mutex<Lifecycle>,
    stop_requested: AtomicBool,
    fatal_reported: AtomicBool,
}

struct Lifecycle {
    state: ServiceState,
    process: Option<Arc<ProcessHandle>>,
    start: Option<Signal<()>>,
    stop: Option<Signal<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ComposedService {
    pub fn new(config: NormalizedServiceConfig, stop_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                stop_timeout,
                observers: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(Lifecycle {
                    state: ServiceState::Idle,
                    process: None,
                    start: None,
                    stop: None,
                }),
                stop_requested: AtomicBool::new(false),
                fatal_reported: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.id
    }

    pub fn config(&self) -> &NormalizedServiceConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServiceState {
        lock(&self.inner.lifecycle).state
    }

    /// The process, once `start` has created it.
    pub fn process(&self) -> Option<Arc<ProcessHandle>> {
        lock(&self.inner.lifecycle).process.clone()
    }

    /// Register an observer for events and output lines.
    pub fn subscribe(&self, observer: Arc<dyn ServiceObserver>) {
        lock(&self.inner.observers).push(observer);
    }

    /// Start the service.
    ///
    /// The first call spawns the process; later calls return the same
    /// future. It resolves once the process is up and the readiness probe
    /// passed, and stays pending if either fails or a stop intervenes.
    pub fn start(&self) -> Signal<()> {
        let inner = &self.inner;
        let mut lifecycle = lock(&inner.lifecycle);
        if let Some(start) = &lifecycle.start {
            return start.clone();
        }
        if lifecycle.state == ServiceState::Stopped {
            let start = future::pending::<()>().boxed().shared();
            lifecycle.start = Some(start.clone());
            return start;
        }

        lifecycle.state = ServiceState::Starting;
        inner.emit(&ServiceEvent::Starting);

        let sink: LineSink = {
            let weak = Arc::downgrade(inner);
            Arc::new(move |line: &OutputLine| {
                if let Some(inner) = weak.upgrade() {
                    inner.emit_output(line);
                }
            })
        };
        let spec = ProcessSpec {
            label: inner.config.id.clone(),
            argv: inner.config.command.clone(),
            env: inner.config.env.clone(),
            stop_timeout: inner.stop_timeout,
        };
        let process = Arc::new(ProcessHandle::spawn(&spec, sink));
        let output = process.take_output().unwrap_or_else(OutputStream::closed);

        let task = tokio::spawn(run_start(inner.clone(), process.clone(), output));
        tokio::spawn(watch_exit(inner.clone(), process.clone()));

        let start = async move {
            if !matches!(task.await, Ok(true)) {
                future::pending::<()>().await;
            }
        }
        .boxed()
        .shared();

        lifecycle.process = Some(process);
        lifecycle.start = Some(start.clone());
        start
    }

    /// Stop the service.
    ///
    /// Resolves right away if no process is running. Otherwise the first
    /// call interrupts the process and later calls share its outcome.
    pub fn stop(&self) -> Signal<()> {
        let inner = &self.inner;
        let mut lifecycle = lock(&inner.lifecycle);
        if let Some(stop) = &lifecycle.stop {
            return stop.clone();
        }

        let process = match &lifecycle.process {
            None => {
                lifecycle.state = ServiceState::Stopped;
                return future::ready(()).boxed().shared();
            }
            Some(process) if process.is_ended() => {
                return future::ready(()).boxed().shared();
            }
            Some(process) => process.clone(),
        };

        inner.stop_requested.store(true, Ordering::SeqCst);
        lifecycle.state = ServiceState::Stopping;
        inner.emit(&ServiceEvent::Stopping);

        let ended = process.terminate();
        let task = tokio::spawn({
            let inner = inner.clone();
            async move {
                ended.await;
                inner.set_state(ServiceState::Stopped);
                inner.emit(&ServiceEvent::Stopped);
            }
        });
        let stop = async move {
            let _ = task.await;
        }
        .boxed()
        .shared();

        lifecycle.stop = Some(stop.clone());
        stop
    }
}

impl Inner {
    fn emit(&self, event: &ServiceEvent) {
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.on_event(&self.config.id, event);
        }
    }

    fn emit_output(&self, line: &OutputLine) {
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.on_output(&self.config.id, line);
        }
    }

    fn set_state(&self, state: ServiceState) {
        lock(&self.lifecycle).state = state;
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn report_fatal(&self, error: ServiceError) {
        if self.fatal_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(service = %self.config.id, kind = error.kind(), "Service failed");
        self.emit(&ServiceEvent::Fatal(error));
    }
}

async fn run_start(inner: Arc<Inner>, process: Arc<ProcessHandle>, output: OutputStream) -> bool {
    let id = inner.config.id.clone();
    let started = process.started().map_err({
        let service = id.clone();
        move |e| ServiceError::Spawn {
            service,
            message: e.message,
        }
    });
    let ready = check_ready(inner.config.ready.clone(), output, inner.config.ready_timeout)
        .map_err(move |message| ServiceError::Readiness { service: id, message });

    match future::try_join(started, ready).await {
        Ok(_) => {
            let mut lifecycle = lock(&inner.lifecycle);
            if inner.stop_requested() {
                return false;
            }
            lifecycle.state = ServiceState::Started;
            inner.emit(&ServiceEvent::Started);
            true
        }
        Err(error) => {
            if inner.stop_requested() {
                tracing::debug!(service = %inner.config.id, %error, "Ignoring failure after stop");
            } else {
                inner.report_fatal(error);
            }
            false
        }
    }
}

async fn check_ready(
    probe: ReadyProbe,
    output: OutputStream,
    limit: Option<Duration>,
) -> Result<(), String> {
    let check = probe.check(ReadyContext { output });
    match limit {
        Some(limit) => match tokio::time::timeout(limit, check).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
        },
        None => check.await.map_err(|e| e.to_string()),
    }
}

async fn watch_exit(inner: Arc<Inner>, process: Arc<ProcessHandle>) {
    process.ended().await;
    if process.spawn_error().is_some() || inner.stop_requested() {
        return;
    }
    inner.report_fatal(ServiceError::UnexpectedExit {
        service: inner.config.id.clone(),
    });
}

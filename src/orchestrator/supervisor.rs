//! The orchestrator: starts, watches and stops the whole service graph.
//!
//! # Responsibilities
//! - Start services in dependency order, independent branches concurrently
//! - Turn the first fatal condition or shutdown request into one teardown
//! - Stop dependents before their dependencies
//! - Feed service output and lifecycle lines into the merged stream
//!
//! # Data Flow
//! ```text
//! start_all → node(id) = all(node(dep) for dep) → service.start()
//! ServiceEvent::Fatal ─┐
//! shutdown signal ─────┼→ die(reason) → stop_all → flush → exit status 1
//! explicit request ────┘
//! stop_all  → node(id) = all(node(dependent) for dependent) → service.stop()
//! ```
//!
//! # Design Decisions
//! - Per-node futures are memoized, so a node shared by several paths runs once
//! - A node re-checks `stopping` after its dependencies are up and before
//!   spawning anything
//! - `die` is the only way into teardown; the first call wins

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;

use crate::config::{NormalizedConfig, ServiceId};
use crate::observability::metrics;
use crate::observability::{label_width, OutputSink};
use crate::orchestrator::graph::DependencyGraph;
use crate::process::{OutputLine, Signal};
use crate::service::{ComposedService, ServiceEvent, ServiceObserver};

/// Exit status once the orchestrator has torn everything down.
pub const DIE_EXIT_CODE: i32 = 1;

/// Supervises every configured service. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    services: HashMap<ServiceId, ComposedService>,
    graph: DependencyGraph,
    label_width: usize,
    output: OutputSink,
    stopping: AtomicBool,
    exit: watch::Sender<Option<i32>>,
    start_all: Mutex<Option<Signal<()>>>,
    stop_all: Mutex<Option<Signal<()>>>,
    die: Mutex<Option<Signal<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Orchestrator {
    /// Create one `ComposedService` per configured service. Nothing is
    /// spawned until `start_all`.
    pub fn new(config: &NormalizedConfig, output: OutputSink) -> Self {
        let stop_timeout = config.timeouts.stop();
        let services = config
            .services
            .iter()
            .map(|service| {
                (
                    service.id.clone(),
                    ComposedService::new(service.clone(), stop_timeout),
                )
            })
            .collect();
        let (exit, _) = watch::channel(None);

        let inner = Arc::new(Inner {
            services,
            graph: DependencyGraph::from_config(config),
            label_width: label_width(config.services.iter().map(|s| s.id.as_str())),
            output,
            stopping: AtomicBool::new(false),
            exit,
            start_all: Mutex::new(None),
            stop_all: Mutex::new(None),
            die: Mutex::new(None),
        });

        for service in inner.services.values() {
            service.subscribe(Arc::new(Bridge {
                orchestrator: Arc::downgrade(&inner),
            }));
        }

        Self { inner }
    }

    pub fn service(&self, id: &str) -> Option<&ComposedService> {
        self.inner.services.get(id)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    /// Width of the label column in the merged output.
    pub fn label_width(&self) -> usize {
        self.inner.label_width
    }

    pub fn is_stopping(&self) -> bool {
        self.inner.stopping.load(Ordering::SeqCst)
    }

    /// Start every service, each after all of its dependencies.
    ///
    /// Resolves once every service is ready. Never resolves if a teardown
    /// begins first.
    pub fn start_all(&self) -> Signal<()> {
        let mut memo = lock(&self.inner.start_all);
        if let Some(start) = &*memo {
            return start.clone();
        }

        self.inner.output.log("Starting all services...");
        let inner = self.inner.clone();
        let nodes = node_futures(&self.inner.graph, |id, dependencies| {
            let inner = inner.clone();
            let id = id.to_string();
            async move {
                future::join_all(dependencies).await;
                if inner.stopping.load(Ordering::SeqCst) {
                    return future::pending::<()>().await;
                }
                if let Some(service) = inner.services.get(&id) {
                    service.start().await;
                }
            }
            .boxed()
        });

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            future::join_all(nodes).await;
            if inner.stopping.load(Ordering::SeqCst) {
                return false;
            }
            inner.output.log("Started all services");
            true
        });
        let start = completion(task);
        *memo = Some(start.clone());
        start
    }

    /// Stop every service, each after all of the services depending on it.
    pub fn stop_all(&self) -> Signal<()> {
        let mut memo = lock(&self.inner.stop_all);
        if let Some(stop) = &*memo {
            return stop.clone();
        }

        let inner = self.inner.clone();
        let nodes = node_futures(&self.inner.graph.reversed(), |id, dependents| {
            let inner = inner.clone();
            let id = id.to_string();
            async move {
                future::join_all(dependents).await;
                if let Some(service) = inner.services.get(&id) {
                    service.stop().await;
                }
            }
            .boxed()
        });

        let task = tokio::spawn(async move {
            future::join_all(nodes).await;
            true
        });
        let stop = completion(task);
        *memo = Some(stop.clone());
        stop
    }

    /// Tear everything down and exit.
    ///
    /// The first call logs `reason`, stops all services, flushes the output
    /// and sets the exit status. Later calls do nothing and share the
    /// outcome of the first.
    ///
    /// Completes only while something reads the output receiver, since the
    /// flush waits for the reader to catch up.
    pub fn die(&self, reason: impl Into<String>) -> Signal<()> {
        let mut memo = lock(&self.inner.die);
        if let Some(die) = &*memo {
            return die.clone();
        }

        let reason = reason.into();
        self.inner.stopping.store(true, Ordering::SeqCst);
        tracing::debug!(%reason, "Tearing down");
        self.inner.output.log(reason);
        self.inner.output.log("Stopping all services...");

        let stop = self.stop_all();
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            stop.await;
            inner.output.log("Stopped all services");
            inner.output.flush().await;
            inner.exit.send_replace(Some(DIE_EXIT_CODE));
            true
        });
        let die = completion(task);
        *memo = Some(die.clone());
        die
    }

    /// Wait until `die` has finished and return the exit status.
    pub async fn wait_for_exit(&self) -> i32 {
        let mut exit = self.inner.exit.subscribe();
        let code = match exit.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(DIE_EXIT_CODE),
            Err(_) => DIE_EXIT_CODE,
        };
        code
    }
}

/// A memoized future for a spawned task: resolves when the task returns
/// `true`, stays pending otherwise.
fn completion(task: tokio::task::JoinHandle<bool>) -> Signal<()> {
    async move {
        if !matches!(task.await, Ok(true)) {
            future::pending::<()>().await;
        }
    }
    .boxed()
    .shared()
}

/// Build one memoized future per node. `node` receives the futures of
/// everything the node waits for.
fn node_futures<F>(graph: &DependencyGraph, mut node: F) -> Vec<Signal<()>>
where
    F: FnMut(&str, Vec<Signal<()>>) -> BoxFuture<'static, ()>,
{
    let mut memo = HashMap::new();
    graph
        .ids()
        .map(|id| visit(graph, id, &mut memo, &mut node))
        .collect()
}

fn visit<F>(
    graph: &DependencyGraph,
    id: &str,
    memo: &mut HashMap<ServiceId, Signal<()>>,
    node: &mut F,
) -> Signal<()>
where
    F: FnMut(&str, Vec<Signal<()>>) -> BoxFuture<'static, ()>,
{
    if let Some(existing) = memo.get(id) {
        return existing.clone();
    }
    let waits_for = graph
        .waits_for(id)
        .iter()
        .map(|target| visit(graph, target, memo, node))
        .collect();
    let future = node(id, waits_for).shared();
    memo.insert(id.to_string(), future.clone());
    future
}

/// Routes service events and output into the orchestrator.
struct Bridge {
    orchestrator: Weak<Inner>,
}

impl ServiceObserver for Bridge {
    fn on_event(&self, service: &str, event: &ServiceEvent) {
        let Some(inner) = self.orchestrator.upgrade() else {
            return;
        };
        match event {
            ServiceEvent::Starting => inner.output.log(format!("Starting service '{}'...", service)),
            ServiceEvent::Started => {
                metrics::record_service_start(service);
                metrics::set_service_running(service, true);
                inner.output.log(format!("Started service '{}'", service));
            }
            ServiceEvent::Stopping => inner.output.log(format!("Stopping service '{}'...", service)),
            ServiceEvent::Stopped => {
                metrics::set_service_running(service, false);
                inner.output.log(format!("Stopped service '{}'", service));
            }
            ServiceEvent::Fatal(error) => {
                metrics::record_fatal(service, error.kind());
                metrics::set_service_running(service, false);
                let _ = Orchestrator { inner }.die(format!("Error: {}", error));
            }
        }
    }

    fn on_output(&self, service: &str, line: &OutputLine) {
        if let Some(inner) = self.orchestrator.upgrade() {
            inner.output.service_line(service, line);
        }
    }
}

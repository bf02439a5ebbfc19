//! Readiness probes.
//!
//! A probe receives the merged output of a freshly spawned service and
//! resolves once the service can be used by its dependents. A failing probe
//! aborts startup of the whole composite service.
//!
//! # Design Decisions
//! - Probes are plain async closures behind an `Arc`, so configs stay `Clone`
//! - Line probes never fail on closed output; an exiting process is
//!   reported as an exit, not as a readiness failure
//! - Declarative `ReadySpec`s from config files map onto the same helpers

pub mod output_line;
pub mod port;
pub mod timeout;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde::{Serialize, Serializer};

use crate::config::schema::ReadySpec;
use crate::process::OutputStream;

pub use output_line::{once_output_line, once_output_line_includes, once_output_line_is, wait_for_line};
pub use port::{is_port_used, once_port_used, wait_until_port_used};
pub use timeout::once_timeout;

/// Error returned by a failing probe.
pub type ProbeError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a probe.
pub type ProbeFuture = BoxFuture<'static, Result<(), ProbeError>>;

/// What a probe gets to look at.
pub struct ReadyContext {
    /// Merged stdout/stderr lines of the service.
    pub output: OutputStream,
}

/// A readiness check.
#[derive(Clone)]
pub struct ReadyProbe {
    description: Arc<str>,
    check: Arc<dyn Fn(ReadyContext) -> ProbeFuture + Send + Sync>,
}

impl ReadyProbe {
    /// Create a probe from an async closure.
    pub fn new<F, Fut>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(ReadyContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ProbeError>> + Send + 'static,
    {
        Self {
            description: description.into().into(),
            check: Arc::new(move |ctx: ReadyContext| check(ctx).boxed()),
        }
    }

    /// A probe that succeeds right away.
    pub fn immediate() -> Self {
        Self::new("immediate", |_ctx| async { Ok::<(), ProbeError>(()) })
    }

    /// Human-readable summary, used when printing the configuration.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the probe.
    pub fn check(&self, ctx: ReadyContext) -> ProbeFuture {
        (self.check)(ctx)
    }
}

impl fmt::Debug for ReadyProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadyProbe").field(&self.description).finish()
    }
}

impl Serialize for ReadyProbe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.description)
    }
}

impl From<&ReadySpec> for ReadyProbe {
    fn from(spec: &ReadySpec) -> Self {
        match spec {
            ReadySpec::OutputLineIs { value } => once_output_line_is(value.clone()),
            ReadySpec::OutputLineIncludes { value } => once_output_line_includes(value.clone()),
            ReadySpec::PortUsed { port, host } => once_port_used(*port, host.clone()),
            ReadySpec::Timeout { ms } => once_timeout(std::time::Duration::from_millis(*ms)),
        }
    }
}

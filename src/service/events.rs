//! Service lifecycle notifications.

use thiserror::Error;

use crate::config::ServiceId;
use crate::process::OutputLine;

/// Fatal conditions of a running composite service. Any of these tears the
/// whole composite service down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The OS could not create the process.
    #[error("Service '{service}' failed to spawn: {message}")]
    Spawn { service: ServiceId, message: String },

    /// The readiness probe failed or timed out.
    #[error("Service '{service}' failed its readiness check: {message}")]
    Readiness { service: ServiceId, message: String },

    /// The process ended without having been asked to stop.
    #[error("Service '{service}' exited")]
    UnexpectedExit { service: ServiceId },
}

impl ServiceError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Spawn { .. } => "spawn",
            ServiceError::Readiness { .. } => "readiness",
            ServiceError::UnexpectedExit { .. } => "exit",
        }
    }
}

/// What happened to a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Starting,
    Started,
    Stopping,
    Stopped,
    Fatal(ServiceError),
}

/// Receives the events and output of a service.
///
/// Observers must be subscribed before `start()` is called. `Starting`,
/// `Started` and `Stopping` are delivered while the service is locked, so an
/// observer must not call back into the same service synchronously.
pub trait ServiceObserver: Send + Sync {
    fn on_event(&self, service: &str, event: &ServiceEvent);

    fn on_output(&self, _service: &str, _line: &OutputLine) {}
}

//! Ownership of the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::config::NormalizedConfig;
use crate::observability::OutputSink;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("An orchestrator has already been launched on this host")]
    AlreadyLaunched,
}

/// Launches at most one orchestrator.
#[derive(Debug, Default)]
pub struct Host {
    launched: AtomicBool,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the orchestrator for `config`. Fails on every call after the
    /// first.
    pub fn launch(&self, config: &NormalizedConfig, output: OutputSink) -> Result<Orchestrator, HostError> {
        if self.launched.swap(true, Ordering::SeqCst) {
            return Err(HostError::AlreadyLaunched);
        }
        Ok(Orchestrator::new(config, output))
    }

    pub fn is_launched(&self) -> bool {
        self.launched.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{normalize_config, ComposedServiceConfig, CompositeServiceConfig};
    use crate::observability::output_channel;

    #[tokio::test]
    async fn test_second_launch_fails() {
        let config = normalize_config(
            CompositeServiceConfig::default().service("only", ComposedServiceConfig::new("true")),
        )
        .unwrap();
        let (sink, _receiver) = output_channel();
        let host = Host::new();

        assert!(host.launch(&config, sink.clone()).is_ok());
        assert!(host.is_launched());
        assert_eq!(
            host.launch(&config, sink).err(),
            Some(HostError::AlreadyLaunched)
        );
    }
}

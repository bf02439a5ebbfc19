//! Composite service: run several processes as one supervised unit.
//!
//! Services start in dependency order, each gated behind a readiness probe.
//! Their output is merged into one labeled stream, and the first failure or
//! shutdown signal tears everything down exactly once.

// Configuration
pub mod config;

// Process and service lifecycle
pub mod process;
pub mod ready;
pub mod service;

// Orchestration
pub mod lifecycle;
pub mod orchestrator;

// Cross-cutting concerns
pub mod observability;

// Front ends
pub mod http;

pub use config::{
    load_config, normalize_config, ComposedServiceConfig, CompositeServiceConfig, ConfigError,
    NormalizedConfig,
};
pub use lifecycle::{Host, HostError};
pub use orchestrator::Orchestrator;
pub use service::{ComposedService, ServiceError};

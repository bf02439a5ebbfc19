//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or programmatic CompositeServiceConfig
//!     → loader.rs (parse & deserialize, keeping declaration order)
//!     → validation.rs (shape checks, dependency references, cycles)
//!     → NormalizedConfig (validated, immutable)
//!     → handed to the orchestrator
//! ```
//!
//! # Design Decisions
//! - Config is immutable once normalized; there is no reload
//! - All sections have defaults to allow minimal configs
//! - Raw service fields are loosely typed so errors can name the service

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, read_config, LoadError};
pub use schema::{
    ComposedServiceConfig, CompositeServiceConfig, Declarations, ObservabilityConfig, ReadySpec,
    ServiceId, TimeoutConfig,
};
pub use validation::{normalize_config, ConfigError, NormalizedConfig, NormalizedServiceConfig};

//! Orchestration of the service graph.
//!
//! # Data Flow
//! ```text
//! NormalizedConfig
//!     → graph.rs (dependency edges, forward and reversed)
//!     → supervisor.rs (one ComposedService per id)
//!         → start_all: forward graph, dependencies first
//!         → die: first fatal condition or signal → stop_all
//!         → stop_all: reversed graph, dependents first
//! ```

pub mod graph;
pub mod supervisor;

pub use graph::DependencyGraph;
pub use supervisor::{Orchestrator, DIE_EXIT_CODE};

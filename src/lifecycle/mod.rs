//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     NormalizedConfig → output writer → Host::launch → start_all
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Orchestrator::die
//!
//! Shutdown (shutdown.rs):
//!     one-shot flag for the HTTP proxy front end
//! ```
//!
//! # Design Decisions
//! - One orchestrator per `Host`; no process-global state
//! - Every teardown goes through `die`

pub mod host;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use host::{Host, HostError};
pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::run;

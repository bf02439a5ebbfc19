//! OS process boundary.
//!
//! # Data Flow
//! ```text
//! ProcessSpec (argv, env)
//!     → handle.rs spawns the child with piped stdout/stderr
//!     → output.rs reads each pipe line by line
//!     → lines merged in arrival order
//!         → LineSink (labeled output of the composite service)
//!         → OutputStream (readiness probe)
//!     → pipes closed + child reaped → `ended`
//! ```
//!
//! # Design Decisions
//! - No environment inheritance beyond `PATH`
//! - Interrupt first; forced kill only after the stop timeout
//! - One handle per process; nothing is ever restarted

pub mod handle;
pub mod output;

pub use handle::{ProcessHandle, ProcessSpec, Signal, SpawnError, STARTED_GRACE};
pub use output::{LineSink, OutputLine, OutputStream, StreamKind};

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Orchestrator and services produce:
//!     → output.rs (the merged, labeled stream on stdout)
//!     → logging.rs (tracing diagnostics on stderr)
//!     → metrics.rs (counters and gauges, optional Prometheus endpoint)
//! ```
//!
//! # Design Decisions
//! - stdout belongs to the merged stream; nothing else writes there
//! - Metrics are cheap to record and exported only when enabled

pub mod logging;
pub mod metrics;
pub mod output;

pub use output::{format_event, label_width, output_channel, LogEvent, LogSource, OutputReceiver, OutputSink};

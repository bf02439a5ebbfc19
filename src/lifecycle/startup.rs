//! Running a composite service from a validated config.
//!
//! # Responsibilities
//! - Wire the merged output stream to stdout
//! - Print the normalized config when asked
//! - Launch the orchestrator and start every service
//! - Route SIGINT and SIGTERM into `die`
//!
//! # Design Decisions
//! - The exit status comes from the orchestrator; `run` never exits the process
//! - Output is flushed by `die` before the status is published

use crate::config::NormalizedConfig;
use crate::lifecycle::host::{Host, HostError};
use crate::lifecycle::signals::shutdown_signal;
use crate::observability::{label_width, output_channel, OutputSink};

/// Run until the composite service dies and return the exit status.
pub async fn run(host: &Host, config: NormalizedConfig) -> Result<i32, HostError> {
    let (sink, receiver) = output_channel();
    let width = label_width(config.services.iter().map(|s| s.id.as_str()));
    let writer = tokio::spawn(receiver.write_to(tokio::io::stdout(), width));

    if config.print_config {
        print_config(&sink, &config);
    }

    let orchestrator = host.launch(&config, sink)?;

    tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            let signal = shutdown_signal().await;
            tracing::debug!(signal, "Shutdown signal received");
            let _ = orchestrator.die(format!("Received shutdown signal '{}'", signal));
        }
    });

    let _ = orchestrator.start_all();
    let code = orchestrator.wait_for_exit().await;
    writer.abort();
    Ok(code)
}

fn print_config(sink: &OutputSink, config: &NormalizedConfig) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => {
            sink.log("Config:");
            for line in json.lines() {
                sink.log(line);
            }
        }
        Err(e) => tracing::warn!(error = %e, "Failed to render config"),
    }
}

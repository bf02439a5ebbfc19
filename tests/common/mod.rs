//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use composite_service::config::{normalize_config, ComposedServiceConfig, CompositeServiceConfig};
use composite_service::lifecycle::Host;
use composite_service::observability::{format_event, output_channel, OutputReceiver};
use composite_service::ready::once_output_line_includes;
use composite_service::Orchestrator;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Script driving every test service.
pub const SERVICE_SCRIPT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/service.sh");

/// The compiled binary.
pub const BINARY: &str = env!("CARGO_BIN_EXE_composite-service");

/// A fixture service, ready once it prints its rocket.
pub fn fixture_service() -> ComposedServiceConfig {
    ComposedServiceConfig::new(vec!["sh", SERVICE_SCRIPT]).ready(once_output_line_includes("🚀"))
}

/// Formatted lines of the merged stream, as they arrive.
#[derive(Clone, Default)]
pub struct Output {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Output {
    pub fn collect(mut receiver: OutputReceiver, width: usize) -> Self {
        let output = Self::default();
        let lines = output.lines.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                lines.lock().unwrap().push(format_event(&event, width));
            }
        });
        output
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Index of `line`, panicking with the full output if it is missing.
    pub fn position(&self, line: &str) -> usize {
        let lines = self.lines();
        lines
            .iter()
            .position(|l| l == line)
            .unwrap_or_else(|| panic!("{:?} not found in {:#?}", line, lines))
    }

    pub fn contains(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }
}

/// Launch an orchestrator for `config` with its output collected.
pub fn launch(config: CompositeServiceConfig) -> (Orchestrator, Output) {
    let config = normalize_config(config).unwrap();
    let (sink, receiver) = output_channel();
    let orchestrator = Host::new().launch(&config, sink).unwrap();
    let output = Output::collect(receiver, orchestrator.label_width());
    (orchestrator, output)
}

/// Start everything and wait for the orchestrator to die on its own.
pub async fn run_until_exit(config: CompositeServiceConfig) -> (i32, Output) {
    let (orchestrator, output) = launch(config);
    let _ = orchestrator.start_all();
    let code = tokio::time::timeout(Duration::from_secs(15), orchestrator.wait_for_exit())
        .await
        .expect("composite service did not exit");
    (code, output)
}

/// Start a simple mock backend that returns a fixed response. Returns the
/// bound address.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut request).await;
                let response_str = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    response.len(),
                    response
                );
                let _ = socket.write_all(response_str.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// A local port nobody listens on.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

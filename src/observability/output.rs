//! The merged output stream of the composite service.
//!
//! # Data Flow
//! ```text
//! service output lines ─┐
//!                       ├─→ OutputSink (unbounded mpsc) → OutputReceiver → stdout
//! orchestrator lines ───┘
//! ```
//!
//! # Design Decisions
//! - One channel, one writer: the printed order is the arrival order
//! - Formatting is a pure function of the event and the label width
//! - `flush` is a marker in the same channel, so it waits for everything
//!   logged before it

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::config::ServiceId;
use crate::process::{OutputLine, StreamKind};

/// Separator between a service label and its line.
pub const SEPARATOR: &str = " | ";

/// Who produced a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LogSource {
    Orchestrator,
    Service(ServiceId),
}

/// One line of the merged stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub source: LogSource,
    pub stream: StreamKind,
    pub text: String,
}

impl LogEvent {
    pub fn orchestrator(text: impl Into<String>) -> Self {
        Self {
            source: LogSource::Orchestrator,
            stream: StreamKind::Stdout,
            text: text.into(),
        }
    }

    pub fn service(id: impl Into<ServiceId>, line: &OutputLine) -> Self {
        Self {
            source: LogSource::Service(id.into()),
            stream: line.stream,
            text: line.text.clone(),
        }
    }
}

/// Width of the label column: the length of the longest id.
pub fn label_width<'a>(ids: impl IntoIterator<Item = &'a str>) -> usize {
    ids.into_iter().map(|id| id.chars().count()).max().unwrap_or(0)
}

/// Render one event. Service lines get their id, padded to `width`, as a
/// prefix; orchestrator lines are printed as they are.
pub fn format_event(event: &LogEvent, width: usize) -> String {
    match &event.source {
        LogSource::Orchestrator => event.text.clone(),
        LogSource::Service(id) => format!("{:<width$}{}{}", id, SEPARATOR, event.text, width = width),
    }
}

enum Message {
    Event(LogEvent),
    Flush(oneshot::Sender<()>),
}

/// Create a connected sink and receiver.
pub fn output_channel() -> (OutputSink, OutputReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutputSink { tx }, OutputReceiver { rx })
}

/// Write side of the merged stream. Cheap to clone.
#[derive(Clone)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<Message>,
}

impl OutputSink {
    pub fn send(&self, event: LogEvent) {
        if self.tx.send(Message::Event(event)).is_err() {
            tracing::trace!("Output receiver gone, dropping line");
        }
    }

    /// Log an orchestrator line.
    pub fn log(&self, text: impl Into<String>) {
        self.send(LogEvent::orchestrator(text));
    }

    /// Forward one output line of a service.
    pub fn service_line(&self, id: &str, line: &OutputLine) {
        self.send(LogEvent::service(id, line));
    }

    /// Wait until every line sent so far has been written out.
    ///
    /// Pending until the receiver reaches the marker, so a reader must be
    /// running. Returns at once if the receiver is gone.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Message::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Read side of the merged stream.
pub struct OutputReceiver {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl OutputReceiver {
    /// Next event, or `None` once every sink is gone.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        loop {
            match self.rx.recv().await? {
                Message::Event(event) => return Some(event),
                Message::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    /// Write every event to `writer` until all sinks are dropped.
    pub async fn write_to<W>(mut self, mut writer: W, width: usize) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(message) = self.rx.recv().await {
            match message {
                Message::Event(event) => {
                    let mut line = format_event(&event, width);
                    line.push('\n');
                    writer.write_all(line.as_bytes()).await?;
                }
                Message::Flush(done) => {
                    writer.flush().await?;
                    let _ = done.send(());
                }
            }
        }
        writer.flush().await
    }
}

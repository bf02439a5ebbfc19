//! Line-oriented process output.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One complete line of process output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

impl OutputLine {
    pub fn new(stream: StreamKind, text: impl Into<String>) -> Self {
        Self {
            stream,
            text: text.into(),
        }
    }
}

/// Callback receiving every output line of a process, in arrival order.
pub type LineSink = Arc<dyn Fn(&OutputLine) + Send + Sync>;

/// The merged stdout/stderr lines of one process.
///
/// Yields lines in arrival order and ends once both pipes have closed.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<OutputLine>,
}

impl OutputStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<OutputLine>) -> Self {
        Self { rx }
    }

    /// A stream that has already ended.
    pub fn closed() -> Self {
        let (_, rx) = mpsc::unbounded_channel();
        Self { rx }
    }

    /// Next line, or `None` once the process output has closed.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.rx.recv().await
    }
}

/// Read `reader` line by line until EOF, tagging each line with `stream`.
///
/// Invalid UTF-8 is replaced rather than ending the stream.
pub(crate) async fn read_lines<R>(reader: R, stream: StreamKind, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(OutputLine::new(stream, text)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(?stream, error = %e, "Output pipe read failed");
                break;
            }
        }
    }
}

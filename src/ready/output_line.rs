//! Output line probes.

use std::sync::Arc;

use crate::process::OutputStream;
use crate::ready::{ProbeError, ReadyProbe};

/// Wait until a line passing `test` appears.
///
/// If the output closes first this never returns; the process exit is
/// reported separately.
pub async fn wait_for_line<F>(output: &mut OutputStream, test: F)
where
    F: Fn(&str) -> bool,
{
    while let Some(line) = output.next_line().await {
        if test(&line.text) {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Ready once an output line passes `test`.
pub fn once_output_line<F>(description: impl Into<String>, test: F) -> ReadyProbe
where
    F: Fn(&str) -> bool + Send + Sync + 'static,
{
    let test = Arc::new(test);
    ReadyProbe::new(description, move |mut ctx| {
        let test = test.clone();
        async move {
            wait_for_line(&mut ctx.output, |line| test(line)).await;
            Ok::<(), ProbeError>(())
        }
    })
}

/// Ready once an output line equals `value`.
pub fn once_output_line_is(value: impl Into<String>) -> ReadyProbe {
    let value = value.into();
    once_output_line(format!("output line is {:?}", value), move |line| line == value)
}

/// Ready once an output line contains `value`.
pub fn once_output_line_includes(value: impl Into<String>) -> ReadyProbe {
    let value = value.into();
    once_output_line(format!("output line includes {:?}", value), move |line| {
        line.contains(value.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{OutputLine, StreamKind};
    use crate::ready::ReadyContext;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn stream(lines: &[&str]) -> (mpsc::UnboundedSender<OutputLine>, OutputStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        for line in lines {
            tx.send(OutputLine::new(StreamKind::Stdout, *line)).unwrap();
        }
        (tx, OutputStream::new(rx))
    }

    #[tokio::test]
    async fn test_line_is_matches_whole_line() {
        let (_tx, output) = stream(&["Starting 🚀...", "Started 🚀"]);
        let probe = once_output_line_is("Started 🚀");
        probe.check(ReadyContext { output }).await.unwrap();
    }

    #[tokio::test]
    async fn test_line_includes_waits_for_match() {
        let (tx, output) = stream(&["booting"]);
        let probe = once_output_line_includes("Listening @ http://");
        let check = tokio::spawn(probe.check(ReadyContext { output }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!check.is_finished());

        tx.send(OutputLine::new(StreamKind::Stderr, "Listening @ http://0.0.0.0:80"))
            .unwrap();
        check.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_output_never_resolves() {
        let (tx, output) = stream(&["no match"]);
        drop(tx);
        let probe = once_output_line_is("ready");
        let result =
            tokio::time::timeout(Duration::from_millis(100), probe.check(ReadyContext { output }))
                .await;
        assert!(result.is_err());
    }
}

//! TCP port probe.

use std::time::Duration;

use tokio::net::TcpStream;

use crate::ready::{ProbeError, ReadyProbe};

/// Interval between connection attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// True if something accepts connections on `host:port`.
pub async fn is_port_used(host: &str, port: u16) -> bool {
    TcpStream::connect((host, port)).await.is_ok()
}

/// Poll until `host:port` accepts connections.
pub async fn wait_until_port_used(host: &str, port: u16) {
    while !is_port_used(host, port).await {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Ready once the service accepts connections on `host:port`.
///
/// Fails right away if the port is already taken when the probe starts,
/// since it could never tell the service apart from whatever holds it.
pub fn once_port_used(port: u16, host: impl Into<String>) -> ReadyProbe {
    let host = host.into();
    ReadyProbe::new(format!("port {}:{} in use", host, port), move |_ctx| {
        let host = host.clone();
        async move {
            if is_port_used(&host, port).await {
                return Err(ProbeError::from(format!("Port {} is already in use", port)));
            }
            wait_until_port_used(&host, port).await;
            Ok::<(), ProbeError>(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::OutputStream;
    use crate::ready::ReadyContext;
    use tokio::net::TcpListener;

    fn ctx() -> ReadyContext {
        ReadyContext {
            output: OutputStream::closed(),
        }
    }

    #[tokio::test]
    async fn test_port_already_in_use_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = once_port_used(port, "127.0.0.1").check(ctx()).await.unwrap_err();
        assert_eq!(err.to_string(), format!("Port {} is already in use", port));
    }

    #[tokio::test]
    async fn test_waits_until_port_bound() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let check = tokio::spawn(once_port_used(port, "127.0.0.1").check(ctx()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!check.is_finished());

        let _listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), check)
            .await
            .expect("probe should notice the bound port")
            .unwrap()
            .unwrap();
    }
}

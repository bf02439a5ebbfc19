//! Fixed delay probe.

use std::time::Duration;

use crate::ready::{ProbeError, ReadyProbe};

/// Ready after `delay`, whatever the service prints.
pub fn once_timeout(delay: Duration) -> ReadyProbe {
    ReadyProbe::new(format!("after {}ms", delay.as_millis()), move |_ctx| async move {
        tokio::time::sleep(delay).await;
        Ok::<(), ProbeError>(())
    })
}

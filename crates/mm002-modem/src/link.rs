//! Helpers shared by the protocol modules for talking to the shared link.

use tracing::debug;

use mm002_at_io::SharedLink;
use mm002_core::{Command, Result, ResultCode};

/// Timeout for configuration and status commands.
pub(crate) const CONFIG_TIMEOUT_MS: u32 = 2000;

/// Timeout for commands that put a frame on the air.
pub(crate) const SEND_TIMEOUT_MS: u32 = 20000;

/// Run one command cycle, queueing behind any caller already using the link.
pub(crate) async fn exchange(
    link: &SharedLink,
    command: &Command,
    args: Option<&str>,
    timeout_ms: u32,
) -> Result<ResultCode> {
    let mut link = link.lock().await;
    let code = link.send_command(command, args, timeout_ms).await?;
    debug!(command = %command, %code, "command finished");
    Ok(code)
}

/// Forward everything the modem says during `duration_ms` to the observers.
pub(crate) async fn poll(link: &SharedLink, duration_ms: u32) -> Result<()> {
    link.lock().await.poll_link(duration_ms).await
}

/// Map a successful send to `PayloadTruncatedWarning` if the payload was cut.
pub(crate) fn with_truncation(code: ResultCode, truncated: bool) -> ResultCode {
    if truncated && code == ResultCode::Success {
        ResultCode::PayloadTruncatedWarning
    } else {
        code
    }
}

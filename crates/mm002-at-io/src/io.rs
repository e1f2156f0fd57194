//! Link I/O task.
//!
//! One tokio task owns the transport. It reads in short windows and appends
//! whatever arrives to the shared [`RingBuffer`], of which it is the only
//! writer. Writes and control-line changes reach it as [`Request`]s and are
//! served ahead of the receive branch: an idle receive is abandoned as soon
//! as a request arrives, so per-byte pacing and the wake pulse run at the
//! configured timing rather than at the receive window's.
//!
//! Requires [`Transport::receive`] to be cancel safe.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use mm002_core::error::{Error, Result};
use mm002_core::transport::Transport;
use mm002_core::types::WakeLine;

use crate::ring_buffer::RingBuffer;

const READ_CHUNK: usize = 256;
const REQUEST_QUEUE: usize = 32;

/// A request sent from the engine to the I/O task.
#[derive(Debug)]
pub enum Request {
    /// Write bytes to the modem.
    Send {
        data: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Drive a control line.
    SetLine {
        line: WakeLine,
        on: bool,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to a running I/O task. Dropping it cancels the task.
pub struct LinkIo {
    tx: mpsc::Sender<Request>,
    cancel: CancellationToken,
    task: JoinHandle<Box<dyn Transport>>,
}

impl LinkIo {
    /// Start serving `transport`, pumping received bytes into `ring` and
    /// waiting at most `window` per receive call.
    pub fn spawn(transport: Box<dyn Transport>, ring: Arc<RingBuffer>, window: Duration) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(io_loop(transport, ring, window, rx, cancel.clone()));
        LinkIo { tx, cancel, task }
    }

    /// False once the task has exited, whether stopped or failed.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    async fn request(&self, make: impl FnOnce(oneshot::Sender<Result<()>>) -> Request) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| Error::ConnectionLost)?;
        reply_rx.await.map_err(|_| Error::ConnectionLost)?
    }

    /// Write `data` and wait until the transport has taken it.
    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.request(|reply| Request::Send { data, reply }).await
    }

    pub async fn set_line(&self, line: WakeLine, on: bool) -> Result<()> {
        self.request(|reply| Request::SetLine { line, on, reply })
            .await
    }

    /// Cancel the task, wait for it to exit and take the transport back.
    ///
    /// Returns `None` only if the task panicked.
    pub async fn stop(mut self) -> Option<Box<dyn Transport>> {
        self.cancel.cancel();
        match (&mut self.task).await {
            Ok(transport) => Some(transport),
            Err(e) => {
                if e.is_panic() {
                    warn!("link I/O task panicked");
                }
                None
            }
        }
    }
}

impl Drop for LinkIo {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for LinkIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkIo")
            .field("running", &self.is_running())
            .finish()
    }
}

/// The I/O loop. Priority order: cancellation, requests, receive.
async fn io_loop(
    mut transport: Box<dyn Transport>,
    ring: Arc<RingBuffer>,
    window: Duration,
    mut requests: mpsc::Receiver<Request>,
    cancel: CancellationToken,
) -> Box<dyn Transport> {
    let mut buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("link I/O task cancelled");
                break;
            }

            req = requests.recv() => match req {
                Some(req) => handle_request(req, &mut transport).await,
                None => {
                    debug!("request channel closed, exiting link I/O task");
                    break;
                }
            },

            received = transport.receive(&mut buf, window) => match received {
                Ok(n) => {
                    trace!(bytes = n, "rx");
                    ring.write(&buf[..n]);
                }
                // The receive call already waited for the window.
                Err(Error::Timeout) => {}
                Err(e) => {
                    warn!(error = %e, "link I/O task stopped");
                    break;
                }
            },
        }
    }
    transport
}

async fn handle_request(req: Request, transport: &mut Box<dyn Transport>) {
    match req {
        Request::Send { data, reply } => {
            let _ = reply.send(transport.send(&data).await);
        }
        Request::SetLine { line, on, reply } => {
            let result = match line {
                WakeLine::Dtr => transport.set_dtr(on).await,
                WakeLine::Rts => transport.set_rts(on).await,
                WakeLine::None => Ok(()),
            };
            let _ = reply.send(result);
        }
    }
}

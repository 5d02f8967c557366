//! Batch-coalescing client: one stream, many concurrent callers.
//!
//! A [`BatchClient`] owns exactly one stream to the enclave through a
//! worker task. Callers submit `(command, payload)` pairs over a channel;
//! the worker coalesces everything that arrives within the batch window
//! (or until the size threshold) into a single wire batch, performs
//! exactly one send and one receive per batch, and hands each caller the
//! response at its own position.
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► mpsc ─► Worker ── BatchReq ──► enclave
//! Caller N ─┘              ▲                      │
//!      oneshot per caller ─┴──── BatchResp ◄──────┘
//! ```
//!
//! # Cancellation
//!
//! Dropping an [`invoke`](BatchClient::invoke) future (e.g. via
//! `tokio::time::timeout`) abandons only that caller's wait. The batch is
//! shared state: it still fires, and every other caller still receives its
//! response. The in-flight batch is deliberately never aborted on a
//! caller's behalf.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{Result, VrpcError};
use crate::protocol::{BatchReq, BatchResp, Frame, FramedStream, Request, Response};
use crate::transport::{self, Endpoint, Io};

/// One caller's pending request.
struct Submission {
    command: String,
    payload: Bytes,
    reply: oneshot::Sender<Result<Response>>,
}

enum ClientOp {
    Invoke(Submission),
    Close,
}

/// Handle to a batch-coalescing stream client.
///
/// Cheap to clone; all clones feed the same worker and stream. The handle
/// stays shareable under load because the worker serializes all stream
/// access internally.
#[derive(Clone, Debug)]
pub struct BatchClient {
    tx: mpsc::UnboundedSender<ClientOp>,
}

impl BatchClient {
    /// Dial an endpoint and spawn the stream worker.
    pub async fn connect(endpoint: &Endpoint, config: &PoolConfig) -> Result<Self> {
        let io = transport::connect(endpoint, config.dial_timeout).await?;
        Ok(Self::from_stream(io, config))
    }

    /// Spawn the stream worker over a caller-supplied stream.
    ///
    /// The client runs over any bidirectional, ordered, reliable byte
    /// stream; this is the entry point for custom transports and tests.
    pub fn from_stream<S: Io + 'static>(io: S, config: &PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            framed: FramedStream::with_max_frame_size(io, config.max_frame_size),
            rx,
            window: config.batch_window,
            threshold: config.batch_size_threshold.max(1),
            keepalive_interval: config.keepalive_interval,
            keepalive_timeout: config.keepalive_timeout,
            window_start: Instant::now(),
            last_activity: Instant::now(),
        };
        tokio::spawn(worker.run());
        Self { tx }
    }

    /// Submit one call and wait for its response.
    ///
    /// Safe for concurrent use. Returns when the enclosing batch completes;
    /// drop the future to cancel the wait (see the module docs).
    pub async fn invoke(&self, command: &str, payload: impl Into<Bytes>) -> Result<Response> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ClientOp::Invoke(Submission {
                command: command.to_string(),
                payload: payload.into(),
                reply: reply_tx,
            }))
            .map_err(|_| VrpcError::StreamGone)?;
        reply_rx.await.map_err(|_| VrpcError::StreamGone)?
    }

    /// Ask the worker to shut the stream down.
    ///
    /// Waiters whose batch already completed observe their response; the
    /// rest observe an invoke error.
    pub fn close(&self) {
        let _ = self.tx.send(ClientOp::Close);
    }

    /// Whether two handles drive the same worker.
    pub(crate) fn same_worker(&self, other: &BatchClient) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

enum Collected {
    Fire,
    Shutdown,
}

/// The stream worker: exclusive owner of the stream and the current batch.
struct Worker<S> {
    framed: FramedStream<S>,
    rx: mpsc::UnboundedReceiver<ClientOp>,
    window: Duration,
    threshold: usize,
    keepalive_interval: Duration,
    keepalive_timeout: Duration,
    /// Start of the current batch window; reset right after each fire, so
    /// the window is in continuous motion under steady load.
    window_start: Instant,
    last_activity: Instant,
}

impl<S: Io + 'static> Worker<S> {
    async fn run(mut self) {
        let mut batch: Vec<Submission> = Vec::new();
        loop {
            match self.collect(&mut batch).await {
                Collected::Fire => {
                    if let Err(e) = self.fire(&mut batch).await {
                        warn!("batch transport failure: {}", e);
                        for sub in batch.drain(..) {
                            let _ = sub.reply.send(Err(VrpcError::BatchAborted));
                        }
                        // Dropping rx fails queued and future submissions
                        // fast; recovery is the pool's job.
                        let _ = self.framed.shutdown().await;
                        return;
                    }
                    self.window_start = Instant::now();
                    self.last_activity = self.window_start;
                }
                Collected::Shutdown => {
                    for sub in batch.drain(..) {
                        let _ = sub.reply.send(Err(VrpcError::StreamGone));
                    }
                    let _ = self.framed.shutdown().await;
                    return;
                }
            }
        }
    }

    /// Accumulate submissions until the batch is ready to fire.
    ///
    /// The batch fires when the size threshold is reached, or when the
    /// window has elapsed and the batch is non-empty. A window that expires
    /// empty leaves the batch armed: the next submission fires alone,
    /// immediately.
    async fn collect(&mut self, batch: &mut Vec<Submission>) -> Collected {
        let deadline = tokio::time::sleep_until(self.window_start + self.window);
        tokio::pin!(deadline);
        let mut expired = false;

        loop {
            if batch.len() >= self.threshold {
                return Collected::Fire;
            }
            if expired && !batch.is_empty() {
                return Collected::Fire;
            }

            tokio::select! {
                _ = &mut deadline, if !expired => {
                    expired = true;
                }
                _ = tokio::time::sleep_until(self.last_activity + self.keepalive_interval),
                    if batch.is_empty() =>
                {
                    if let Err(e) = self.ping().await {
                        warn!("keepalive failed: {}", e);
                        return Collected::Shutdown;
                    }
                    self.last_activity = Instant::now();
                }
                op = self.rx.recv() => match op {
                    Some(ClientOp::Invoke(sub)) => batch.push(sub),
                    Some(ClientOp::Close) | None => return Collected::Shutdown,
                },
            }
        }
    }

    /// Exactly one send and one receive per batch; distribute responses by
    /// position.
    async fn fire(&mut self, batch: &mut Vec<Submission>) -> Result<()> {
        let requests: Vec<Request> = batch
            .iter()
            .map(|sub| Request::new(sub.command.clone(), sub.payload.clone()))
            .collect();
        debug!(len = requests.len(), "firing batch");

        self.framed.send(&Frame::Batch(BatchReq { requests })).await?;
        let reply = self.recv_reply().await?;

        let len = reply.responses.len();
        let mut responses = reply.responses.into_iter();
        for (index, sub) in batch.drain(..).enumerate() {
            let outcome = match responses.next() {
                Some(resp) => Ok(resp),
                None => Err(VrpcError::ResponseMissing { len, index }),
            };
            // A cancelled caller has dropped its receiver; that is fine.
            let _ = sub.reply.send(outcome);
        }
        Ok(())
    }

    async fn recv_reply(&mut self) -> Result<BatchResp> {
        loop {
            match self.framed.recv().await? {
                Frame::Reply(reply) => return Ok(reply),
                // A pong from an earlier keepalive may still be in flight.
                Frame::Pong => continue,
                other => {
                    return Err(VrpcError::Protocol(format!(
                        "unexpected frame {} on client stream",
                        other.kind()
                    )));
                }
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        self.framed.send(&Frame::Ping).await?;
        match tokio::time::timeout(self.keepalive_timeout, self.recv_pong()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(VrpcError::KeepaliveTimeout),
        }
    }

    async fn recv_pong(&mut self) -> Result<()> {
        match self.framed.recv().await? {
            Frame::Pong => Ok(()),
            other => Err(VrpcError::Protocol(format!(
                "unexpected frame {} while waiting for pong",
                other.kind()
            ))),
        }
    }
}

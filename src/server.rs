//! Enclave-side stream server.
//!
//! Accepts one bidirectional stream per client connection and runs a
//! receive/dispatch/reply loop on each. Requests within a batch are
//! dispatched **sequentially, in order**, so `responses[i]` always answers
//! `requests[i]`; concurrency comes from the many streams of the host-side
//! pool, not from reordering inside a batch.
//!
//! The server is stateless across streams; it holds only the dispatcher
//! table.
//!
//! # Example
//!
//! ```ignore
//! use vrpc::dispatch::Dispatcher;
//! use vrpc::server::Server;
//! use vrpc::transport::Endpoint;
//!
//! let dispatcher = Dispatcher::default()
//!     .handle("/echo", |_ctx, req: Req| async move { Ok(resp_for(req)) });
//!
//! let running = Server::new(dispatcher)
//!     .bind(&Endpoint::Vsock { cid: 0, port: 50001 })
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Result, VrpcError};
use crate::protocol::{BatchResp, Frame, FramedStream};
use crate::transport::{BoxedIo, Endpoint, Listener};

/// A configured, not yet listening server.
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
}

impl Server {
    /// Create a server with the default configuration.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::with_config(dispatcher, ServerConfig::default())
    }

    /// Create a server with a custom configuration.
    pub fn with_config(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self { dispatcher: Arc::new(dispatcher), config }
    }

    /// Bind to an endpoint and start serving in the background.
    pub async fn bind(self, endpoint: &Endpoint) -> Result<RunningServer> {
        let mut listener = Listener::bind(endpoint).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = self.dispatcher;
        let config = self.config;
        let handle = tokio::spawn(async move {
            let mut accept_shutdown = shutdown_rx.clone();
            loop {
                let accepted = tokio::select! {
                    _ = accept_shutdown.changed() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((io, peer)) => {
                        debug!(%peer, "stream accepted");
                        tokio::spawn(serve_stream(
                            io,
                            dispatcher.clone(),
                            config.clone(),
                            shutdown_rx.clone(),
                            peer,
                        ));
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                    }
                }
            }
        });

        Ok(RunningServer { local_addr, shutdown: shutdown_tx, handle })
    }
}

/// Handle to a listening server.
pub struct RunningServer {
    local_addr: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RunningServer {
    /// The bound address, useful when listening on port 0.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Stop accepting, signal every stream task to exit, and wait for the
    /// accept loop to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Per-stream serving loop: receive a batch, dispatch it in order, reply.
async fn serve_stream(
    io: BoxedIo,
    dispatcher: Arc<Dispatcher>,
    config: ServerConfig,
    mut shutdown: watch::Receiver<bool>,
    peer: String,
) {
    let mut framed = FramedStream::with_max_frame_size(io, config.max_frame_size);
    let mut last_ping: Option<Instant> = None;

    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => break,
            frame = framed.recv() => match frame {
                Ok(frame) => frame,
                Err(VrpcError::ConnectionClosed) => {
                    debug!(%peer, "stream closed by peer");
                    break;
                }
                Err(e) => {
                    warn!(%peer, "stream recv failed: {}", e);
                    break;
                }
            },
        };

        match frame {
            Frame::Batch(batch) => {
                debug!(%peer, len = batch.requests.len(), "batch received");
                let mut responses = Vec::with_capacity(batch.requests.len());
                for req in batch.requests {
                    responses.push(dispatcher.dispatch(&req.command, req.payload).await);
                }
                if let Err(e) = framed.send(&Frame::Reply(BatchResp { responses })).await {
                    warn!(%peer, "stream send failed: {}", e);
                    break;
                }
            }
            Frame::Ping => {
                // The enforcement counterpart of the client's idle ping:
                // a peer pinging faster than the minimum interval loses
                // the stream.
                if let Some(prev) = last_ping {
                    if prev.elapsed() < config.min_ping_interval {
                        warn!(%peer, "ping before minimum interval, dropping stream");
                        break;
                    }
                }
                last_ping = Some(Instant::now());
                if framed.send(&Frame::Pong).await.is_err() {
                    break;
                }
            }
            other => {
                warn!(%peer, kind = other.kind(), "unexpected frame on server stream");
                break;
            }
        }
    }
}

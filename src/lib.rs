//! # vrpc
//!
//! Batching RPC bridge between a host process and an enclave process
//! reached over vsock (or TCP for local development).
//!
//! Many concurrent host-side calls are multiplexed over a small fixed pool
//! of long-lived streams. Each stream carries *batches*: calls arriving
//! within a short window (or up to a size threshold) are coalesced into a
//! single wire message, collapsing high fan-in into few round-trips.
//!
//! ## Architecture
//!
//! - **Host side**: [`pool::ClientPool`] over [`client::BatchClient`]: a
//!   round-robin pool of batch-coalescing stream clients with automatic
//!   slot replacement after transport failures.
//! - **Enclave side**: [`server::Server`] over [`dispatch::Dispatcher`]:
//!   one task per stream dispatching each batch entry, in order, to a
//!   typed handler registered under a command string.
//! - **Wire**: length-prefixed [`protocol::Frame`] envelopes over any
//!   ordered reliable byte stream ([`transport::Endpoint`] selects vsock
//!   or TCP). Handler payloads are JSON.
//!
//! ## Example
//!
//! ```ignore
//! use vrpc::dispatch::Dispatcher;
//! use vrpc::pool::ClientPool;
//! use vrpc::server::Server;
//! use vrpc::transport::Endpoint;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, Default)]
//! struct Req { xid: String }
//!
//! #[derive(Serialize)]
//! struct Resp { dix: String }
//!
//! // Enclave side.
//! let dispatcher = Dispatcher::default().handle("/echo", |_ctx, req: Req| async move {
//!     Ok(Resp { dix: req.xid.chars().rev().collect() })
//! });
//! let server = Server::new(dispatcher)
//!     .bind(&Endpoint::Vsock { cid: 0, port: 50001 })
//!     .await?;
//!
//! // Host side.
//! let pool = ClientPool::connect(
//!     Endpoint::Vsock { cid: 16, port: 50001 },
//!     Default::default(),
//! ).await?;
//! let resp = pool.invoke("/echo", &br#"{"xid":"abcd"}"#[..]).await?;
//! assert_eq!(&resp.payload[..], br#"{"dix":"dcba"}"#);
//! ```
//!
//! ## Cancellation
//!
//! Dropping an invoke future abandons only that caller's wait; the batch
//! it joined still fires and every other caller still gets its response.
//! See [`client`] for the full contract.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::BatchClient;
pub use config::{PoolConfig, ServerConfig};
pub use dispatch::{CallContext, Dispatcher};
pub use error::{Result, VrpcError};
pub use pool::ClientPool;
pub use protocol::{BatchReq, BatchResp, Request, Response};
pub use server::Server;
pub use transport::Endpoint;

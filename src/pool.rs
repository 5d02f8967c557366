//! Client pool: N coalescing streams with round-robin selection and
//! transport-failure recovery.
//!
//! The pool owns a fixed array of [`BatchClient`] slots. Each invoke picks
//! the next slot round-robin and delegates; under a small pool this spreads
//! load at roughly `QPS / N` per stream, and the batch window smooths the
//! rest. Slots are never checked out: a [`BatchClient`] is inherently
//! shareable because its worker serializes all stream access.
//!
//! On a transport-level error the pool closes the failed client and dials
//! a replacement in place, while every other slot keeps serving. Caller
//! cancellation is expressed by dropping the invoke future, so it is never
//! mistaken for a transport failure.
//!
//! # Example
//!
//! ```ignore
//! use vrpc::pool::ClientPool;
//! use vrpc::transport::Endpoint;
//!
//! let pool = ClientPool::connect(
//!     Endpoint::Vsock { cid: 16, port: 50001 },
//!     Default::default(),
//! ).await?;
//!
//! let resp = pool.invoke("/echo", &br#"{"xid":"abcd"}"#[..]).await?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::client::BatchClient;
use crate::config::PoolConfig;
use crate::error::{Result, VrpcError};
use crate::protocol::Response;
use crate::transport::Endpoint;

/// A pool of batch-coalescing clients to one enclave endpoint.
#[derive(Clone, Debug)]
pub struct ClientPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    endpoint: Endpoint,
    config: PoolConfig,
    slots: RwLock<Vec<BatchClient>>,
    next: AtomicUsize,
    closed: AtomicBool,
}

impl ClientPool {
    /// Eagerly open `pool_size` streams to the endpoint.
    ///
    /// If any dial fails, the already-opened streams are closed and the
    /// error is returned.
    pub async fn connect(endpoint: Endpoint, config: PoolConfig) -> Result<Self> {
        let size = config.pool_size.max(1);
        let mut slots = Vec::with_capacity(size);
        for _ in 0..size {
            match BatchClient::connect(&endpoint, &config).await {
                Ok(client) => slots.push(client),
                Err(e) => {
                    for client in &slots {
                        client.close();
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                endpoint,
                config,
                slots: RwLock::new(slots),
                next: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Submit one call through the next slot.
    ///
    /// On a transport-level failure the slot is replaced before the
    /// original error is returned; the other slots keep serving
    /// throughout. Dropping the future cancels only this caller's wait.
    pub async fn invoke(&self, command: &str, payload: impl Into<Bytes>) -> Result<Response> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(VrpcError::PoolClosed);
        }

        let (idx, client) = self.pick();
        match client.invoke(command, payload).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!(command, slot = idx, "invoke cmd failed: {}", e);
                self.replace_slot(idx, client).await;
                Err(e)
            }
        }
    }

    /// Round-robin slot selection; the slot stays in place.
    fn pick(&self) -> (usize, BatchClient) {
        let slots = self.inner.slots.read().expect("pool lock poisoned");
        let idx = self.inner.next.fetch_add(1, Ordering::Relaxed) % slots.len();
        (idx, slots[idx].clone())
    }

    /// Replace a failed slot with a freshly dialed client.
    ///
    /// If the dial fails, the broken client stays in the slot so the next
    /// invoke through it retries creation. If another caller already
    /// replaced the slot, the late replacement is discarded.
    async fn replace_slot(&self, idx: usize, observed: BatchClient) {
        if self.inner.closed.load(Ordering::Acquire) {
            debug!("client pool is closed, skipping slot replacement");
            return;
        }

        observed.close();
        match BatchClient::connect(&self.inner.endpoint, &self.inner.config).await {
            Ok(fresh) => {
                let mut slots = self.inner.slots.write().expect("pool lock poisoned");
                if slots[idx].same_worker(&observed) {
                    debug!(slot = idx, "recreated client after transport error");
                    slots[idx] = fresh;
                } else {
                    // Lost the race against a concurrent replacement.
                    fresh.close();
                }
            }
            Err(e) => {
                warn!(slot = idx, "recreate client failed: {}", e);
            }
        }
    }

    /// Close every stream and refuse further invokes.
    ///
    /// Waiters whose batch already completed observe their response; the
    /// rest observe an invoke error.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let slots = self.inner.slots.read().expect("pool lock poisoned");
        for client in slots.iter() {
            client.close();
        }
        debug!("client pool closed");
    }

    /// Number of slots in the pool.
    pub fn size(&self) -> usize {
        self.inner.slots.read().expect("pool lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // TEST-NET-3: dials time out.
        let endpoint = Endpoint::Tcp("203.0.113.1:9".to_string());
        let config = PoolConfig {
            pool_size: 2,
            dial_timeout: Duration::from_millis(50),
            ..Default::default()
        };

        let err = ClientPool::connect(endpoint, config).await.unwrap_err();
        match err {
            VrpcError::ConnectTimeout | VrpcError::Io(_) => {}
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_invokes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    return;
                }
            }
        });

        let config = PoolConfig { pool_size: 1, ..Default::default() };
        let pool = ClientPool::connect(Endpoint::Tcp(addr), config).await.unwrap();
        pool.close();

        match pool.invoke("/echo", Bytes::new()).await {
            Err(VrpcError::PoolClosed) => {}
            other => panic!("expected PoolClosed, got {:?}", other),
        }
    }
}

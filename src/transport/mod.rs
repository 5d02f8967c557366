//! Transport selection: TCP or vsock.
//!
//! The enclave is normally reached over vsock (addressed by context ID and
//! port); TCP covers local development and tests, where no hypervisor
//! socket exists. Both produce the same boxed stream, so everything above
//! this module is transport-agnostic.
//!
//! # Example
//!
//! ```ignore
//! use vrpc::transport::Endpoint;
//!
//! let prod = Endpoint::Vsock { cid: 16, port: 50001 };
//! let dev = Endpoint::Tcp("127.0.0.1:50001".to_string());
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, VrpcError};

/// Marker trait for the byte streams the framework runs over.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

/// A boxed bidirectional byte stream.
pub type BoxedIo = Box<dyn Io>;

impl std::fmt::Debug for dyn Io {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedIo")
    }
}

/// Where the peer lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP address in `host:port` form.
    Tcp(String),
    /// Vsock address. When listening, the context ID is ignored and the
    /// socket binds to any CID.
    Vsock { cid: u32, port: u32 },
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{}", addr),
            Endpoint::Vsock { cid, port } => write!(f, "vsock://{}:{}", cid, port),
        }
    }
}

/// Dial an endpoint, bounded by `dial_timeout`.
pub async fn connect(endpoint: &Endpoint, dial_timeout: Duration) -> Result<BoxedIo> {
    match tokio::time::timeout(dial_timeout, dial(endpoint)).await {
        Ok(io) => io,
        Err(_) => Err(VrpcError::ConnectTimeout),
    }
}

async fn dial(endpoint: &Endpoint) -> Result<BoxedIo> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(target_os = "linux")]
        Endpoint::Vsock { cid, port } => {
            let addr = tokio_vsock::VsockAddr::new(*cid, *port);
            let stream = tokio_vsock::VsockStream::connect(addr).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(target_os = "linux"))]
        Endpoint::Vsock { .. } => Err(VrpcError::Protocol(
            "vsock transport is only available on linux".to_string(),
        )),
    }
}

/// Listener half of the transport.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(target_os = "linux")]
    Vsock(tokio_vsock::VsockListener),
}

impl Listener {
    /// Bind to an endpoint. Vsock endpoints bind to any context ID, like
    /// the host side of a hypervisor socket always does.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr).await?)),
            #[cfg(target_os = "linux")]
            Endpoint::Vsock { port, .. } => {
                let addr = tokio_vsock::VsockAddr::new(tokio_vsock::VMADDR_CID_ANY, *port);
                Ok(Listener::Vsock(tokio_vsock::VsockListener::bind(addr)?))
            }
            #[cfg(not(target_os = "linux"))]
            Endpoint::Vsock { .. } => Err(VrpcError::Protocol(
                "vsock transport is only available on linux".to_string(),
            )),
        }
    }

    /// Accept one connection, returning the stream and a peer label for
    /// logging.
    pub async fn accept(&mut self) -> Result<(BoxedIo, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(target_os = "linux")]
            Listener::Vsock(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Box::new(stream), format!("vsock:{}", peer)))
            }
        }
    }

    /// The locally bound address, useful when binding port 0.
    pub fn local_addr(&self) -> Result<String> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            #[cfg(target_os = "linux")]
            Listener::Vsock(listener) => {
                let addr = listener.local_addr()?;
                Ok(format!("vsock:{}", addr))
            }
        }
    }
}

//! Byte-stream connectors.
//!
//! Everything above this module speaks to the server through a
//! [`ByteStream`]: any `AsyncRead + AsyncWrite` pipe. A [`Connector`] opens
//! one per connection attempt.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use strand_client::{Config, Socks5Connector};
//!
//! let cfg = Config {
//!     connector: Arc::new(Socks5Connector::new("127.0.0.1:1080")),
//!     ..Default::default()
//! };
//! ```

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A bidirectional byte pipe to the server.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// Opens byte streams to server addresses.
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<Box<dyn ByteStream>>>;
}

// ─── TCP ──────────────────────────────────────────────────────────────────────

const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Plain TCP with `TCP_NODELAY` and TCP keepalive enabled.
#[derive(Clone, Debug, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, io::Result<Box<dyn ByteStream>>> {
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            SockRef::from(&stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
            tracing::debug!("[strand] TCP connected to {addr}");
            Ok(Box::new(stream) as Box<dyn ByteStream>)
        })
    }
}

// ─── SOCKS5 ───────────────────────────────────────────────────────────────────

/// Tunnels every connection through a SOCKS5 proxy.
#[derive(Clone, Debug)]
pub struct Socks5Connector {
    /// Host:port of the SOCKS5 proxy server.
    pub proxy_addr: String,
    /// Optional username and password for proxy authentication.
    pub auth: Option<(String, String)>,
}

impl Socks5Connector {
    /// Create an unauthenticated SOCKS5 connector.
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self { proxy_addr: proxy_addr.into(), auth: None }
    }

    /// Create a SOCKS5 connector with username/password authentication.
    pub fn with_auth(
        proxy_addr: impl Into<String>,
        username:   impl Into<String>,
        password:   impl Into<String>,
    ) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            auth: Some((username.into(), password.into())),
        }
    }
}

impl Connector for Socks5Connector {
    fn connect<'a>(&'a self, target: &'a str) -> BoxFuture<'a, io::Result<Box<dyn ByteStream>>> {
        Box::pin(async move {
            tracing::info!("[socks5] Connecting via {} → {target}", self.proxy_addr);
            let stream = match &self.auth {
                None => Socks5Stream::connect(self.proxy_addr.as_str(), target)
                    .await
                    .map_err(io::Error::other)?,
                Some((user, pass)) => Socks5Stream::connect_with_password(
                    self.proxy_addr.as_str(),
                    target,
                    user.as_str(),
                    pass.as_str(),
                )
                .await
                .map_err(io::Error::other)?,
            };
            let stream = stream.into_inner();
            stream.set_nodelay(true)?;
            tracing::info!("[socks5] Connected");
            Ok(Box::new(stream) as Box<dyn ByteStream>)
        })
    }
}

//! Byte-stream transport to a management interface.
//!
//! Opens a TCP or UNIX-domain socket, validates the `>INFO` greeting that
//! OpenVPN pushes as soon as a management client attaches, and exposes
//! bounded chunked reads to the command channel.

use crate::management::types::*;
use async_trait::async_trait;
use log::debug;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Prefix of the unsolicited line every management session starts with.
pub const GREETING_SENTINEL: &[u8] = b">INFO";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Seams
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An open, exclusively owned byte stream to one management interface.
#[async_trait]
pub trait Transport: Send {
    /// Write all bytes.
    async fn send(&mut self, data: &[u8]) -> MonitorResult<()>;

    /// Read one chunk. Never returns an empty chunk: a closed peer is an error.
    async fn receive_chunk(&mut self) -> MonitorResult<Vec<u8>>;

    /// Release the underlying socket. Safe to call more than once.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens transports for endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport + 'static;

    async fn open(
        &self,
        endpoint: &VpnEndpoint,
        options: &ClientOptions,
    ) -> MonitorResult<Self::Transport>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Stream transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Object-safe bundle of the tokio I/O traits, so TCP and UNIX streams can
/// share one transport type.
pub trait ManagementIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ManagementIo for T {}

/// Transport over any tokio stream.
pub struct StreamTransport<S> {
    stream: Option<S>,
    read_timeout: Duration,
    chunk_size: usize,
}

/// What [`SocketConnector`] hands out.
pub type SocketTransport = StreamTransport<Box<dyn ManagementIo>>;

impl<S: AsyncRead + AsyncWrite + Unpin + Send> StreamTransport<S> {
    pub fn new(stream: S, options: &ClientOptions) -> Self {
        Self {
            stream: Some(stream),
            read_timeout: options.read_timeout,
            chunk_size: options.chunk_size.max(1),
        }
    }

    /// Consume the greeting and check it starts with `>INFO`.
    /// Returns the greeting text.
    pub async fn handshake(&mut self) -> MonitorResult<String> {
        let chunk = self.read_chunk().await?;
        if !chunk.starts_with(GREETING_SENTINEL) {
            let first_line = String::from_utf8_lossy(&chunk)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string();
            return Err(MonitorError::protocol(
                "Management interface did not send the >INFO greeting",
            )
            .with_detail(first_line));
        }
        Ok(String::from_utf8_lossy(&chunk).trim_end().to_string())
    }

    async fn read_chunk(&mut self) -> MonitorResult<Vec<u8>> {
        let stream = self.stream.as_mut().ok_or_else(MonitorError::not_connected)?;
        let mut buf = vec![0u8; self.chunk_size];
        let n = match tokio::time::timeout(self.read_timeout, stream.read(&mut buf)).await {
            Err(_) => {
                return Err(MonitorError::new(
                    MonitorErrorKind::Timeout,
                    format!(
                        "No data from management interface within {:?}",
                        self.read_timeout
                    ),
                ))
            }
            Ok(Err(e)) => {
                return Err(MonitorError::io("Failed to read from management interface")
                    .with_detail(e.to_string()))
            }
            Ok(Ok(n)) => n,
        };
        if n == 0 {
            return Err(MonitorError::io("Management interface closed the connection"));
        }
        buf.truncate(n);
        Ok(buf)
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Transport for StreamTransport<S> {
    async fn send(&mut self, data: &[u8]) -> MonitorResult<()> {
        let stream = self.stream.as_mut().ok_or_else(MonitorError::not_connected)?;
        stream.write_all(data).await.map_err(|e| {
            MonitorError::io("Failed to write to management interface").with_detail(e.to_string())
        })?;
        stream.flush().await.map_err(|e| {
            MonitorError::io("Failed to flush management interface stream")
                .with_detail(e.to_string())
        })
    }

    async fn receive_chunk(&mut self) -> MonitorResult<Vec<u8>> {
        self.read_chunk().await
    }

    fn close(&mut self) {
        // Dropping a tokio socket closes it.
        self.stream.take();
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Socket connector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connects to real TCP / UNIX management sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketConnector;

#[async_trait]
impl Connector for SocketConnector {
    type Transport = SocketTransport;

    async fn open(
        &self,
        endpoint: &VpnEndpoint,
        options: &ClientOptions,
    ) -> MonitorResult<SocketTransport> {
        open(endpoint, options).await
    }
}

/// Open a transport to `endpoint` and validate the greeting.
///
/// Every failure is reported as `ConnectFailed`, except a greeting that does
/// not start with `>INFO`, which is `Protocol`.
pub async fn open(endpoint: &VpnEndpoint, options: &ClientOptions) -> MonitorResult<SocketTransport> {
    let addr = endpoint.mgmt_address();
    let stream: Box<dyn ManagementIo> = match &endpoint.address {
        MgmtAddress::Ip { host, port } => Box::new(
            connect_within(
                TcpStream::connect((host.as_str(), *port)),
                &addr,
                options.connect_timeout,
            )
            .await?,
        ),
        MgmtAddress::UnixSocket { path } => connect_unix(path, &addr, options).await?,
    };
    debug!("Socket to {} open, waiting for greeting", addr);

    let mut transport = StreamTransport::new(stream, options);
    match transport.handshake().await {
        Ok(greeting) => {
            debug!("Greeting from {}: {}", addr, greeting);
            Ok(transport)
        }
        Err(e) if e.kind == MonitorErrorKind::Protocol => Err(e),
        Err(e) => Err(MonitorError::connect_failed(format!(
            "No greeting from management interface at {}",
            addr
        ))
        .with_detail(e.message)),
    }
}

#[cfg(unix)]
async fn connect_unix(
    path: &std::path::Path,
    addr: &str,
    options: &ClientOptions,
) -> MonitorResult<Box<dyn ManagementIo>> {
    let stream = connect_within(
        tokio::net::UnixStream::connect(path),
        addr,
        options.connect_timeout,
    )
    .await?;
    Ok(Box::new(stream))
}

#[cfg(not(unix))]
async fn connect_unix(
    _path: &std::path::Path,
    addr: &str,
    _options: &ClientOptions,
) -> MonitorResult<Box<dyn ManagementIo>> {
    Err(MonitorError::connect_failed(format!(
        "Cannot connect to management interface at {}",
        addr
    ))
    .with_detail("UNIX sockets are not supported on this platform"))
}

async fn connect_within<F, S>(fut: F, addr: &str, timeout: Duration) -> MonitorResult<S>
where
    F: Future<Output = io::Result<S>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(MonitorError::connect_failed(format!(
            "Cannot connect to management interface at {}",
            addr
        ))
        .with_detail(e.to_string())),
        Err(_) => Err(MonitorError::connect_failed(format!(
            "Cannot connect to management interface at {}",
            addr
        ))
        .with_detail(format!("timed out after {:?}", timeout))),
    }
}

//! Shared types, records, error type, and client options for the management client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Endpoint descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a management interface listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MgmtAddress {
    /// `--management <host> <port>`
    Ip { host: String, port: u16 },
    /// `--management <path> unix`
    UnixSocket { path: PathBuf },
}

impl fmt::Display for MgmtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip { host, port } => write!(f, "{}:{}", host, port),
            Self::UnixSocket { path } => write!(f, "{}", path.display()),
        }
    }
}

/// One monitored OpenVPN instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnEndpoint {
    pub name: String,
    pub address: MgmtAddress,
    /// Whether sessions on this instance may be killed through the monitor.
    pub allow_disconnect: bool,
}

impl VpnEndpoint {
    pub fn ip(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            address: MgmtAddress::Ip {
                host: host.into(),
                port,
            },
            allow_disconnect: false,
        }
    }

    pub fn unix_socket(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            address: MgmtAddress::UnixSocket { path: path.into() },
            allow_disconnect: false,
        }
    }

    /// Build an endpoint from loosely-typed parts, enforcing that exactly one
    /// of (host + port) or socket is given. Empty strings count as absent.
    pub fn from_parts(
        name: impl Into<String>,
        host: Option<&str>,
        port: Option<u16>,
        socket: Option<&str>,
    ) -> Result<Self, MonitorError> {
        let host = host.filter(|h| !h.is_empty());
        let socket = socket.filter(|s| !s.is_empty());
        match (host, port, socket) {
            (Some(h), Some(p), None) => Ok(Self::ip(name, h, p)),
            (None, None, Some(s)) => Ok(Self::unix_socket(name, s)),
            _ => Err(MonitorError::invalid_config(
                "Must specify either socket or host and port",
            )),
        }
    }

    pub fn with_allow_disconnect(mut self, allow: bool) -> Self {
        self.allow_disconnect = allow;
        self
    }

    /// `host:port` or the socket path.
    pub fn mgmt_address(&self) -> String {
        self.address.to_string()
    }

    /// Name as an HTML-anchor compatible string.
    pub fn anchor(&self) -> String {
        self.name.to_lowercase().replace(' ', "_")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Client options
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Timeouts and buffer sizing for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub chunk_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Server records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whether the instance is serving peers or is itself a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceMode {
    Server,
    Client,
}

impl fmt::Display for InstanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Parsed reply to `state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerState {
    pub up_since: Option<DateTime<Utc>>,
    /// State name, e.g. `CONNECTED`.
    pub connected: Option<String>,
    pub local_ip: Option<String>,
    /// Only reported by client-mode instances.
    pub remote_ip: Option<String>,
    pub mode: InstanceMode,
    pub success: bool,
}

/// Parsed reply to `load-stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub client_count: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

/// A peer connected to a server-mode instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    /// Server-assigned id used by `client-kill`; absent before 2.4.
    pub client_id: Option<u64>,
    pub common_name: Option<String>,
    pub real_address: Option<String>,
    pub virtual_address: Option<String>,
    pub virtual_ipv6_address: Option<String>,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub connected_since: Option<DateTime<Utc>>,
    pub username: Option<String>,
    pub peer_id: Option<u64>,
    pub cipher: Option<String>,
}

/// Link counters of a client-mode instance (`OpenVPN STATISTICS`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalClientStats {
    pub tun_tap_read: u64,
    pub tun_tap_write: u64,
    pub tcp_udp_read: u64,
    pub tcp_udp_write: u64,
    pub auth_read: u64,
}

/// One entry of a status listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionStats {
    Remote(RemoteSession),
    Local(LocalClientStats),
}

impl SessionStats {
    pub fn client_id(&self) -> Option<u64> {
        match self {
            Self::Remote(r) => r.client_id,
            Self::Local(_) => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Crate-level error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorErrorKind {
    ConnectFailed,
    Protocol,
    NotConnected,
    Parse,
    PermissionDenied,
    Timeout,
    Io,
    CommandFailed,
    InvalidConfig,
}

/// Crate-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorError {
    pub kind: MonitorErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(d) = &self.detail {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl std::error::Error for MonitorError {}

impl MonitorError {
    pub fn new(kind: MonitorErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn connect_failed(msg: impl Into<String>) -> Self {
        Self::new(MonitorErrorKind::ConnectFailed, msg)
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::new(MonitorErrorKind::Protocol, msg)
    }

    pub fn not_connected() -> Self {
        Self::new(
            MonitorErrorKind::NotConnected,
            "Management interface not connected",
        )
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(MonitorErrorKind::Parse, msg)
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(MonitorErrorKind::InvalidConfig, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(MonitorErrorKind::Io, msg)
    }

    /// Errors that mean the connection can no longer be trusted.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self.kind, MonitorErrorKind::Io | MonitorErrorKind::Timeout)
    }
}

impl From<MonitorError> for String {
    fn from(e: MonitorError) -> String {
        e.to_string()
    }
}

pub type MonitorResult<T> = Result<T, MonitorError>;

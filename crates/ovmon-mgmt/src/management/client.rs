//! High-level client for one monitored OpenVPN instance.

use crate::management::channel::{CommandChannel, MgmtCommands};
use crate::management::parse;
use crate::management::transport::{Connector, SocketConnector};
use crate::management::types::*;
use futures::future::BoxFuture;
use log::{error, info, warn};

/// Talks to the management interface of one [`VpnEndpoint`].
///
/// Connection failures are kept as state (see [`VpnClient::last_error`])
/// so that a dashboard can render one row per instance regardless of
/// whether it was reachable. Everything else is returned per call.
pub struct VpnClient<C: Connector = SocketConnector> {
    endpoint: VpnEndpoint,
    options: ClientOptions,
    connector: C,
    channel: Option<CommandChannel<C::Transport>>,
    release: Option<String>,
    last_error: Option<MonitorError>,
}

impl VpnClient<SocketConnector> {
    pub fn new(endpoint: VpnEndpoint) -> Self {
        Self::with_options(endpoint, ClientOptions::default())
    }

    pub fn with_options(endpoint: VpnEndpoint, options: ClientOptions) -> Self {
        Self::with_connector(endpoint, options, SocketConnector)
    }
}

impl<C: Connector> VpnClient<C> {
    pub fn with_connector(endpoint: VpnEndpoint, options: ClientOptions, connector: C) -> Self {
        Self {
            endpoint,
            options,
            connector,
            channel: None,
            release: None,
            last_error: None,
        }
    }

    pub fn endpoint(&self) -> &VpnEndpoint {
        &self.endpoint
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(|c| c.is_open())
    }

    /// The failure of the most recent connection attempt, if it failed.
    pub fn last_error(&self) -> Option<&MonitorError> {
        self.last_error.as_ref()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Open the connection unless one is already open.
    ///
    /// Returns whether the client is connected afterwards; the reason for a
    /// failure is available from [`last_error`](Self::last_error).
    pub async fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }
        self.channel = None;

        match self.connector.open(&self.endpoint, &self.options).await {
            Ok(transport) => {
                info!(
                    "Connected to management interface of '{}' at {}",
                    self.endpoint.name,
                    self.endpoint.mgmt_address()
                );
                self.channel = Some(CommandChannel::new(transport));
                self.last_error = None;
                true
            }
            Err(e) => {
                error!(
                    "Unable to connect to '{}' at {}: {}",
                    self.endpoint.name,
                    self.endpoint.mgmt_address(),
                    e
                );
                self.last_error = Some(e);
                false
            }
        }
    }

    /// Say `quit` and close. Does nothing when not connected.
    pub async fn disconnect(&mut self) {
        if let Some(channel) = self.channel.as_mut().filter(|c| c.is_open()) {
            if let Err(e) = channel.quit().await {
                warn!("Failed to send quit to '{}': {}", self.endpoint.name, e);
            }
        }
        self.close_transport();
    }

    /// Drop the connection without talking to the server.
    pub fn close_transport(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
            info!("Disconnected from '{}'", self.endpoint.name);
        }
    }

    /// Connect, run `body`, then disconnect whatever `body` returned.
    ///
    /// If the returned future is dropped before completion the transport is
    /// closed anyway. When the connection cannot be opened `body` is not run
    /// and the connect error is returned.
    ///
    /// ```no_run
    /// # use ovmon_mgmt::management::{VpnClient, VpnEndpoint};
    /// # async fn demo() -> Result<(), ovmon_mgmt::management::MonitorError> {
    /// let mut client = VpnClient::new(VpnEndpoint::ip("Office", "localhost", 5555));
    /// let _sessions = client
    ///     .scoped(|c| Box::pin(async move { c.sessions().await }))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scoped<R, F>(&mut self, body: F) -> MonitorResult<R>
    where
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, MonitorResult<R>>,
    {
        if !self.connect().await {
            return Err(self
                .last_error
                .clone()
                .unwrap_or_else(MonitorError::not_connected));
        }
        let mut guard = ConnectionGuard { client: self };
        let result = body(&mut *guard.client).await;
        guard.client.disconnect().await;
        result
    }

    async fn command(&mut self, command: &str) -> MonitorResult<String> {
        let channel = self
            .channel
            .as_mut()
            .filter(|c| c.is_open())
            .ok_or_else(MonitorError::not_connected)?;

        match channel.send_command(command).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                if e.is_fatal_to_connection() {
                    warn!(
                        "Dropping connection to '{}' after '{}' failed: {}",
                        self.endpoint.name, command, e
                    );
                    self.close_transport();
                }
                Err(e)
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────

    /// Full release banner. Fetched once per client, then served from cache.
    pub async fn release(&mut self) -> MonitorResult<String> {
        if let Some(release) = &self.release {
            return Ok(release.clone());
        }
        let reply = self.command(MgmtCommands::VERSION).await?;
        let release = parse::parse_release(&reply)?;
        self.release = Some(release.clone());
        Ok(release)
    }

    pub fn cached_release(&self) -> Option<&str> {
        self.release.as_deref()
    }

    pub fn invalidate_release(&mut self) {
        self.release = None;
    }

    /// `x.y.z` of the release. `None` when disconnected with nothing cached.
    pub async fn version(&mut self) -> MonitorResult<Option<String>> {
        if self.release.is_none() && !self.is_connected() {
            return Ok(None);
        }
        let release = self.release().await?;
        parse::parse_semver(Some(&release))
    }

    pub async fn state(&mut self) -> MonitorResult<ServerState> {
        let reply = self.command(MgmtCommands::STATE).await?;
        parse::parse_state(&reply)
    }

    pub async fn stats(&mut self) -> MonitorResult<ServerStats> {
        let reply = self.command(MgmtCommands::LOAD_STATS).await?;
        parse::parse_load_stats(&reply)
    }

    pub async fn sessions(&mut self) -> MonitorResult<Vec<SessionStats>> {
        let reply = self.command(MgmtCommands::STATUS).await?;
        parse::parse_sessions(&reply)
    }

    // ── Control ──────────────────────────────────────────────────

    /// `client-kill <id>`. Requires `allow_disconnect` on the endpoint.
    pub async fn disconnect_session(&mut self, client_id: u64) -> MonitorResult<()> {
        self.ensure_disconnect_allowed()?;
        self.command(&MgmtCommands::client_kill(client_id)).await?;
        info!("Requested disconnect of client {} on '{}'", client_id, self.endpoint.name);
        Ok(())
    }

    /// `kill <common-name>` or `kill <ip:port>`, for peers without a client id.
    pub async fn kill_client(&mut self, target: &str) -> MonitorResult<()> {
        self.ensure_disconnect_allowed()?;
        let target = target.trim();
        if target.is_empty() {
            return Err(MonitorError::new(
                MonitorErrorKind::CommandFailed,
                "kill requires a common name or ip:port",
            ));
        }
        self.command(&MgmtCommands::kill(target)).await?;
        info!("Requested kill of '{}' on '{}'", target, self.endpoint.name);
        Ok(())
    }

    /// Send any command and return the unparsed reply.
    pub async fn send_raw(&mut self, command: &str) -> MonitorResult<String> {
        self.command(command).await
    }

    fn ensure_disconnect_allowed(&self) -> MonitorResult<()> {
        if self.endpoint.allow_disconnect {
            Ok(())
        } else {
            Err(MonitorError::new(
                MonitorErrorKind::PermissionDenied,
                format!("Disconnecting sessions is not allowed on '{}'", self.endpoint.name),
            ))
        }
    }
}

/// Closes the transport when a scoped body is abandoned mid-flight.
struct ConnectionGuard<'a, C: Connector> {
    client: &'a mut VpnClient<C>,
}

impl<C: Connector> Drop for ConnectionGuard<'_, C> {
    fn drop(&mut self) {
        self.client.close_transport();
    }
}

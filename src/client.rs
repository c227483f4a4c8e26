//! VPN Client - session controller
//!
//! Ties the login exchange and the tunnel bridge into one connect/disconnect
//! lifecycle. One client drives one session.

use crate::config::Config;
use crate::crypto::tls::TlsConfig;
use crate::error::{Phase, PhaseContext, Result, VpnError};
use crate::protocol::{AuthClient, SessionInfo};
use crate::tunnel::{TunnelBridge, TunnelState};
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Connection status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected, // Session bootstrapped, tunnel dial/handshake in progress
    Tunneling, // pppd running, pumps relaying
}

/// NetExtender VPN client
///
/// `connect` runs the whole session and only returns once it has ended.
/// `disconnect` may be called from any task, any number of times.
pub struct VpnClient {
    config: Config,
    tls: TlsConfig,
    /// Shutdown signal of the current session, replaced by every `connect`
    shutdown: Mutex<CancellationToken>,
    status: watch::Sender<ConnectionStatus>,
}

impl VpnClient {
    /// Create a new VPN client with the given configuration
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or TLS setup fails
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let tls = TlsConfig::new(&config.server)?;
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        Ok(VpnClient {
            config,
            tls,
            shutdown: Mutex::new(CancellationToken::new()),
            status,
        })
    }

    /// Get current connection status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Log in, bring the tunnel up and relay traffic until disconnect or failure
    ///
    /// Logout is attempted whatever the outcome; its failure is logged and
    /// never replaces the session result.
    pub async fn connect(&self, username: &str, password: &str, domain: &str) -> Result<()> {
        let started = self.status.send_if_modified(|status| {
            if *status == ConnectionStatus::Disconnected {
                *status = ConnectionStatus::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(VpnError::InvalidState(
                "Already connected or connecting".to_string(),
            ));
        }
        let shutdown = self.new_session_token();

        let result = match AuthClient::new(&self.config.server, &self.tls) {
            Ok(auth) => {
                let result = self
                    .run_session(&auth, &shutdown, username, password, domain)
                    .await;
                if let Err(e) = auth.logout().await {
                    log::warn!("logout {e}");
                }
                result
            }
            Err(e) => Err(e),
        };

        self.status.send_replace(ConnectionStatus::Disconnected);
        match &result {
            Ok(()) => log::info!("Disconnected"),
            Err(e) => log::error!("Session ended: {e}"),
        }
        result
    }

    async fn run_session(
        &self,
        auth: &AuthClient,
        shutdown: &CancellationToken,
        username: &str,
        password: &str,
        domain: &str,
    ) -> Result<()> {
        log::info!("Logging in to {}", auth.base_url());
        auth.login(username, password, domain)
            .await
            .in_phase(Phase::Login)?;
        auth.probe_capabilities().await.in_phase(Phase::Probe)?;

        log::info!("Starting session...");
        let session = auth.bootstrap_session().await.in_phase(Phase::Session)?;
        self.status.send_replace(ConnectionStatus::Connected);

        // the gateway needs a moment before the session accepts a tunnel
        let delay = self.config.tunnel.settle_delay();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {
                log::info!("Disconnect requested before tunnel dial");
                return Ok(());
            }
        }

        self.run_tunnel(&session, shutdown).await
    }

    async fn run_tunnel(&self, session: &SessionInfo, shutdown: &CancellationToken) -> Result<()> {
        log::info!("Dialing up tunnel...");
        let mut bridge = TunnelBridge::new(&self.config.server, &self.config.tunnel, &self.tls);
        let mut state = bridge.watch_state();

        let run = bridge.run(session, shutdown);
        tokio::pin!(run);
        let result = loop {
            tokio::select! {
                result = &mut run => break result,
                Ok(()) = state.changed() => {
                    if *state.borrow_and_update() == TunnelState::Bridging {
                        self.status.send_replace(ConnectionStatus::Tunneling);
                    }
                }
            }
        };

        log::debug!("Tunnel {:?} after {:?}", *state.borrow(), session.age());
        result
    }

    /// Ask the running session to end
    ///
    /// Never blocks; calls after the first, or after the session has already
    /// ended, have no further effect.
    pub fn disconnect(&self) -> Result<()> {
        let shutdown = self.shutdown_token();
        if !shutdown.is_cancelled() {
            log::info!("Disconnecting...");
        }
        shutdown.cancel();
        Ok(())
    }

    /// Shutdown token of the current or most recent session
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn new_session_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }
}

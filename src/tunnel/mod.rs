//! Tunnel bridge
//!
//! Opens the TLS tunnel to the gateway, switches it into raw framing mode with
//! the CONNECT handshake, starts pppd and relays traffic between the two until
//! shutdown or failure.

use crate::config::{ServerConfig, TunnelConfig};
use crate::crypto::tls::TlsConfig;
use crate::error::{Phase, PhaseContext, Result, VpnError};
use crate::protocol::constants::*;
use crate::protocol::SessionInfo;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub mod framing;
pub mod link;
pub mod pump;

pub use link::{LinkProcess, PtyStream};
pub use pump::{run_bridge, PumpConfig};

/// Upper bound on the handshake reply header block
const MAX_REPLY_HEADER: usize = 8192;

/// Tunnel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    Dialing,
    HandshakeSent,
    Bridging,
    Closed,
    Failed,
}

/// Build the CONNECT request that switches the TLS stream into tunnel mode
pub fn handshake_request(token: &str) -> String {
    format!(
        "CONNECT {target} HTTP/1.0\r\n\
         Host: {target}\r\n\
         User-Agent: {USER_AGENT}\r\n\
         Connection: close\r\n\
         Connection-Medium: {CONNECTION_MEDIUM}\r\n\
         Frame-Encode: off\r\n\
         Proxy-Authorization: {token}\r\n\
         X-NE-PROTOCOL: {NE_PROTOCOL}\r\n\
         X-NX-Client-Platform: {CLIENT_PLATFORM}\r\n\
         X-SSLVPN-PROTOCOL: {SSLVPN_PROTOCOL}\r\n\
         X-SSLVPN-SERVICE: {SSLVPN_SERVICE}\r\n\
         \r\n",
        target = TUNNEL_TARGET,
    )
}

/// Read the gateway's reply header block and require a 2xx status
///
/// Reads one byte at a time so no tunnel frame bytes are consumed.
pub async fn read_handshake_reply<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut header = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_REPLY_HEADER {
            return Err(VpnError::Protocol(
                "handshake reply header too large".to_string(),
            ));
        }
        if stream.read(&mut byte).await? == 0 {
            return Err(VpnError::Protocol(
                "connection closed during handshake".to_string(),
            ));
        }
        header.push(byte[0]);
    }

    let text = String::from_utf8_lossy(&header);
    let status_line = text.lines().next().unwrap_or_default().to_string();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok());
    match status {
        Some(code) if (200..300).contains(&code) => Ok(status_line),
        _ => Err(VpnError::Protocol(format!(
            "gateway refused tunnel: {status_line:?}"
        ))),
    }
}

/// TLS tunnel to the gateway bridged to a local pppd
pub struct TunnelBridge {
    hostname: String,
    port: u16,
    tunnel: TunnelConfig,
    tls: TlsConfig,
    state: watch::Sender<TunnelState>,
}

impl TunnelBridge {
    pub fn new(server: &ServerConfig, tunnel: &TunnelConfig, tls: &TlsConfig) -> Self {
        Self {
            hostname: server.hostname.clone(),
            port: server.port,
            tunnel: tunnel.clone(),
            tls: tls.clone(),
            state: watch::channel(TunnelState::Idle).0,
        }
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    /// Run the tunnel until `shutdown` fires or something fails
    ///
    /// The TLS connection and pppd are released on every exit path.
    pub async fn run(&mut self, session: &SessionInfo, shutdown: &CancellationToken) -> Result<()> {
        let result = self.run_phases(session, shutdown).await;
        self.state.send_replace(match result {
            Ok(()) => TunnelState::Closed,
            Err(_) => TunnelState::Failed,
        });
        result
    }

    async fn run_phases(
        &mut self,
        session: &SessionInfo,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        self.state.send_replace(TunnelState::Dialing);
        log::info!("Dialing tunnel to {}:{}", self.hostname, self.port);
        let mut stream = self
            .tls
            .connect(&self.hostname, self.port)
            .await
            .in_phase(Phase::Dial)?;

        self.handshake(&mut stream, session)
            .await
            .in_phase(Phase::Handshake)?;

        self.state.send_replace(TunnelState::Bridging);
        let (mut link, pty) = LinkProcess::spawn(&self.tunnel).in_phase(Phase::Bridge)?;
        let config = PumpConfig {
            mtu: usize::from(self.tunnel.mtu),
            buffer_size: self.tunnel.read_buffer_size,
        };

        let result = run_bridge(stream, pty, config, shutdown).await;
        link.terminate().await;
        result.in_phase(Phase::Bridge)
    }

    async fn handshake<S>(&mut self, stream: &mut S, session: &SessionInfo) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if !session.has_token() {
            return Err(VpnError::Protocol(
                "no session token, gateway did not issue the swap cookie".to_string(),
            ));
        }

        stream
            .write_all(handshake_request(session.token()).as_bytes())
            .await
            .map_err(|e| VpnError::Network(format!("handshake write: {e}")))?;
        stream
            .flush()
            .await
            .map_err(|e| VpnError::Network(format!("handshake write: {e}")))?;
        self.state.send_replace(TunnelState::HandshakeSent);

        if self.tunnel.verify_handshake_reply {
            let status = read_handshake_reply(stream).await?;
            log::info!("Gateway accepted tunnel: {status}");
        }
        Ok(())
    }
}

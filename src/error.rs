//! Error types and handling for the NetExtender VPN client

use std::fmt;
use thiserror::Error;

use crate::tunnel::framing::FrameError;

/// Connection phase an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Login,
    Probe,
    Session,
    Dial,
    Handshake,
    Bridge,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Login => "login",
            Phase::Probe => "probe",
            Phase::Session => "session",
            Phase::Dial => "dial",
            Phase::Handshake => "handshake",
            Phase::Bridge => "bridge",
        };
        f.write_str(name)
    }
}

/// Main error type for VPN operations
#[derive(Error, Debug)]
pub enum VpnError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network connectivity errors (HTTP or TCP transport)
    #[error("Network error: {0}")]
    Network(String),

    /// Gateway rejected the login; carries the gateway's message verbatim
    #[error("{0}")]
    Authentication(String),

    /// Gateway response did not have the expected format
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Tunnel framing errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Pump failure while bridging
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Link process (pppd / pty) errors
    #[error("Process error: {0}")]
    Process(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error raised within a connection phase
    #[error("{phase}: {source}")]
    Phase {
        phase: Phase,
        source: Box<VpnError>,
    },
}

impl VpnError {
    /// Innermost error, with any phase context removed
    pub fn root(&self) -> &VpnError {
        match self {
            VpnError::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    /// Outermost phase this error was tagged with
    pub fn phase(&self) -> Option<Phase> {
        match self {
            VpnError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Result type alias for VPN operations
pub type Result<T> = std::result::Result<T, VpnError>;

/// Helper trait for tagging errors with the phase they occurred in
pub trait PhaseContext<T> {
    fn in_phase(self, phase: Phase) -> Result<T>;
}

impl<T> PhaseContext<T> for Result<T> {
    fn in_phase(self, phase: Phase) -> Result<T> {
        self.map_err(|e| VpnError::Phase {
            phase,
            source: Box::new(e),
        })
    }
}

// Implement From for common error types
impl From<toml::de::Error> for VpnError {
    fn from(err: toml::de::Error) -> Self {
        VpnError::Config(format!("TOML parsing error: {err}"))
    }
}

impl From<rustls::Error> for VpnError {
    fn from(err: rustls::Error) -> Self {
        VpnError::Tls(err.to_string())
    }
}

impl From<reqwest::Error> for VpnError {
    fn from(err: reqwest::Error) -> Self {
        VpnError::Network(err.to_string())
    }
}

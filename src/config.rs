//! Configuration module for the NetExtender SSL-VPN client
//!
//! TOML-based configuration parsing and validation.

use crate::error::{Result, VpnError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Gateway hostname or IP address
    pub hostname: String,
    /// Gateway port, shared by the HTTPS exchange and the tunnel
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use HTTPS for the login exchange
    #[serde(default = "default_true")]
    pub use_ssl: bool,
    /// Verify the gateway certificate
    #[serde(default = "default_true")]
    pub verify_certificate: bool,
    /// Extra PEM trust anchors (self-signed gateways)
    #[serde(default)]
    pub ca_file: Option<String>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u32,
}

/// Credentials used by the host binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Login domain
    #[serde(default = "default_domain")]
    pub domain: String,
}

/// Tunnel and link process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Link MTU/MRU; outbound frames never carry more than this
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    /// Path to the pppd binary
    #[serde(default = "default_pppd_path")]
    pub pppd_path: String,
    /// pppd peer name passed to `call`
    #[serde(default = "default_peer")]
    pub peer: String,
    /// Pause between session bootstrap and tunnel dial, in milliseconds
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Read buffer size for both pumps
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Read the gateway reply to the tunnel CONNECT and require a 2xx status
    #[serde(default)]
    pub verify_handshake_reply: bool,
}

impl TunnelConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            pppd_path: default_pppd_path(),
            peer: default_peer(),
            settle_delay_ms: default_settle_delay_ms(),
            read_buffer_size: default_read_buffer_size(),
            verify_handshake_reply: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway configuration
    pub server: ServerConfig,
    /// Credentials
    #[serde(default)]
    pub auth: AuthConfig,
    /// Tunnel configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| VpnError::Config(format!("Failed to read config file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| VpnError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.hostname.is_empty() {
            return Err(VpnError::Config(
                "Server hostname cannot be empty".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(VpnError::Config("Server port cannot be zero".to_string()));
        }

        if self.tunnel.mtu < 576 || self.tunnel.mtu > 9000 {
            return Err(VpnError::Config(
                "MTU must be between 576 and 9000".to_string(),
            ));
        }

        // a single read must be able to hold at least one full frame
        if self.tunnel.read_buffer_size < usize::from(self.tunnel.mtu) + 4 {
            return Err(VpnError::Config(format!(
                "Read buffer size must be at least {} bytes",
                usize::from(self.tunnel.mtu) + 4
            )));
        }

        if self.tunnel.peer.is_empty() || self.tunnel.pppd_path.is_empty() {
            return Err(VpnError::Config(
                "pppd path and peer name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration for a gateway with every other setting at its default
    pub fn for_gateway(hostname: &str, port: u16) -> Self {
        Self {
            server: ServerConfig {
                hostname: hostname.to_string(),
                port,
                use_ssl: true,
                verify_certificate: true,
                ca_file: None,
                timeout: default_timeout(),
            },
            auth: AuthConfig {
                username: None,
                password: None,
                domain: default_domain(),
            },
            tunnel: TunnelConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FromStr for Config {
    type Err = VpnError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| VpnError::Config(format!("Failed to parse TOML: {e}")))
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    4433
}

fn default_timeout() -> u32 {
    30
}

fn default_domain() -> String {
    "LocalDomain".to_string()
}

fn default_mtu() -> u16 {
    1280
}

fn default_pppd_path() -> String {
    "/usr/sbin/pppd".to_string()
}

fn default_peer() -> String {
    "softvpn".to_string()
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_read_buffer_size() -> usize {
    8192
}

fn default_log_level() -> String {
    "info".to_string()
}

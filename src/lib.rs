//! nxvpn - NetExtender SSL-VPN client
//!
//! Logs in to a SonicWALL NetExtender gateway over HTTPS, bootstraps a tunnel
//! session, and bridges the raw TLS tunnel to a local pppd over a pty.
//!
//! ## Layout
//! - [`protocol`]: login, capability probe and session bootstrap
//! - [`tunnel`]: frame codec, CONNECT handshake, pppd link and pumps
//! - [`client`]: connect/disconnect lifecycle tying the two together
//!
//! Route installation and DNS configuration are left to pppd and its scripts.

pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod tunnel;

pub use client::{ConnectionStatus, VpnClient};
pub use config::Config;
pub use error::{Phase, Result, VpnError};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

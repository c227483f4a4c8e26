//! NetExtender SSL-VPN protocol implementation
//!
//! The gateway speaks a reverse-engineered HTTP dialect for login and session
//! setup; all constants below are the values the gateway expects and must not
//! be changed.

pub mod auth;
pub mod session;

pub use auth::AuthClient;
pub use session::{SessionInfo, SessionVariables};

// Protocol constants
pub mod constants {
    /// Client identification sent on every request
    pub const USER_AGENT: &str = "SonicWALL NetExtender for Linux 8.6.801";

    pub const HDR_PDA: &str = "X-NE-PDA";
    pub const HDR_RESULT: &str = "X-NE-tfresult";
    pub const HDR_MESSAGE: &str = "X-NE-message";

    pub const LOGIN_PATH: &str = "cgi-bin/userLogin";
    pub const LOGOUT_PATH: &str = "cgi-bin/userLogout";
    pub const PROBE_PATH: &str = "cgi-bin/sslvpnclient?epcversionquery=nxx";
    pub const BOOTSTRAP_PATH: &str =
        "cgi-bin/sslvpnclient?launchplatform=mac&neProto=3&supportipv6=yes";

    /// Cookie carrying the tunnel session token
    pub const SESSION_COOKIE: &str = "swap";

    /// Surfaced when a login is refused without an explanatory message
    pub const DEFAULT_DENIAL: &str =
        "Login failed - User login denied - Account already in use and uniqueness enable.";

    /// Tunnel handshake target and header values
    pub const TUNNEL_TARGET: &str = "localhost:0";
    pub const SSLVPN_PROTOCOL: &str = "2.0";
    pub const SSLVPN_SERVICE: &str = "NETEXTENDER";
    pub const CLIENT_PLATFORM: &str = "Linux";
    pub const CONNECTION_MEDIUM: &str = "MacOS";
    pub const NE_PROTOCOL: &str = "2.0";
}

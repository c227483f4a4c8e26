//! Session state negotiated with the gateway

use std::time::Instant;

/// Variables parsed from the session bootstrap body
///
/// The body is line oriented, `key=value;` per line. Keys other than the
/// ones kept here are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionVariables {
    pub routes: Vec<String>,
    pub nameservers: Vec<String>,
    pub session_id: Option<String>,
}

impl SessionVariables {
    pub fn parse(body: &str) -> Self {
        let mut vars = Self::default();

        for line in body.lines() {
            let Some((key, value)) = line.trim().trim_matches(';').split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "Route" => vars.routes.push(value.to_string()),
                "dns1" | "dns2" => vars.nameservers.push(value.to_string()),
                "SessionId" => vars.session_id = Some(value.to_string()),
                other => log::trace!("Ignoring session variable {other}"),
            }
        }

        vars
    }
}

/// Result of a successful session bootstrap
///
/// Routes and nameservers are fixed once the bootstrap completes.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    routes: Vec<String>,
    nameservers: Vec<String>,
    token: String,
    established_at: Instant,
}

impl SessionInfo {
    pub fn new(vars: SessionVariables, token: Option<String>) -> Self {
        Self {
            routes: vars.routes,
            nameservers: vars.nameservers,
            token: token.unwrap_or_default(),
            established_at: Instant::now(),
        }
    }

    /// Routes pushed by the gateway, in the order received
    pub fn routes(&self) -> &[String] {
        &self.routes
    }

    pub fn nameservers(&self) -> &[String] {
        &self.nameservers
    }

    /// Tunnel session token; empty if the gateway did not issue one
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    pub fn age(&self) -> std::time::Duration {
        self.established_at.elapsed()
    }
}

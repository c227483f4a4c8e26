//! Login and session bootstrap exchange with the NetExtender gateway
//!
//! The gateway expects three calls in order (login, capability probe,
//! session bootstrap) over one cookie-carrying HTTP client.

use crate::config::ServerConfig;
use crate::crypto::tls::TlsConfig;
use crate::error::{Result, VpnError};
use crate::protocol::constants::*;
use crate::protocol::session::{SessionInfo, SessionVariables};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use url::Url;

/// NetExtender authentication client
///
/// Holds the cookie store that carries the gateway's login cookies from one
/// call to the next.
pub struct AuthClient {
    http_client: Client,
    base_url: Url,
}

impl AuthClient {
    /// Create new authentication client
    pub fn new(server: &ServerConfig, tls: &TlsConfig) -> Result<Self> {
        let tls_config = (*tls.client_config()).clone();
        let http_client = Client::builder()
            .timeout(Duration::from_secs(u64::from(server.timeout)))
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .use_preconfigured_tls(tls_config)
            .build()
            .map_err(|e| VpnError::Network(format!("Failed to create HTTP client: {e}")))?;

        let scheme = if server.use_ssl { "https" } else { "http" };
        let base_url = Url::parse(&format!("{scheme}://{}:{}/", server.hostname, server.port))
            .map_err(|e| VpnError::Config(format!("Invalid gateway address: {e}")))?;

        Ok(AuthClient {
            http_client,
            base_url,
        })
    }

    /// Gateway base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| VpnError::Config(format!("Invalid endpoint {path}: {e}")))
    }

    async fn send(request: RequestBuilder) -> Result<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| VpnError::Network(format!("Request failed: {e}")))
    }

    /// Log in with the user's credentials
    ///
    /// The credentials are only used for this request.
    pub async fn login(&self, username: &str, password: &str, domain: &str) -> Result<()> {
        log::debug!("Logging in as {username} (domain {domain})");

        let form = [
            ("username", username),
            ("password", password),
            ("domain", domain),
            ("login", "true"),
        ];
        let request = self
            .http_client
            .post(self.endpoint(LOGIN_PATH)?)
            .header(HDR_PDA, "true")
            .form(&form);

        let response = Self::send(request).await?;
        log::debug!("Login response status: {}", response.status());
        check_login_result(response.headers())
    }

    /// Client version query the gateway requires before it will hand out a session
    pub async fn probe_capabilities(&self) -> Result<()> {
        let request = self.http_client.get(self.endpoint(PROBE_PATH)?);
        let response = Self::send(request).await?;
        log::debug!("Capability probe status: {}", response.status());
        Ok(())
    }

    /// Fetch routes, nameservers and the tunnel session token
    pub async fn bootstrap_session(&self) -> Result<SessionInfo> {
        let request = self
            .http_client
            .get(self.endpoint(BOOTSTRAP_PATH)?)
            .header(HDR_PDA, "true");
        let response = Self::send(request).await?;

        let token = response
            .cookies()
            .filter(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .last();

        let body = response
            .text()
            .await
            .map_err(|e| VpnError::Network(format!("Failed to read session body: {e}")))?;
        let vars = SessionVariables::parse(&body);

        log::info!(
            "Session established: {} routes, {} nameservers",
            vars.routes.len(),
            vars.nameservers.len()
        );
        for route in &vars.routes {
            log::debug!("Route {route}");
        }
        if token.is_none() {
            log::warn!("Gateway did not set the {SESSION_COOKIE} cookie");
        }

        Ok(SessionInfo::new(vars, token))
    }

    /// End the gateway session
    pub async fn logout(&self) -> Result<()> {
        let request = self
            .http_client
            .post(self.endpoint(LOGOUT_PATH)?)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .header(HDR_PDA, "true")
            .body(" ");
        Self::send(request).await?;
        Ok(())
    }
}

/// Map the login result headers to an outcome
///
/// `0` is success, any other number is a refusal. A missing or non-numeric
/// result is a protocol error rather than a refusal.
pub fn check_login_result(headers: &HeaderMap) -> Result<()> {
    let raw = headers
        .get(HDR_RESULT)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();

    let code: i64 = raw
        .parse()
        .map_err(|_| VpnError::Protocol(format!("Unexpected {HDR_RESULT} value {raw:?}")))?;

    if code == 0 {
        return Ok(());
    }

    let message = headers
        .get(HDR_MESSAGE)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .filter(|message| !message.is_empty());

    log::debug!("Login refused with code {code}");
    Err(VpnError::Authentication(
        message.unwrap_or_else(|| DEFAULT_DENIAL.to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(*value));
        }
        map
    }

    #[test]
    fn test_login_result_success() {
        assert!(check_login_result(&headers(&[("x-ne-tfresult", "0")])).is_ok());
    }

    #[test]
    fn test_login_result_with_message() {
        let err =
            check_login_result(&headers(&[("x-ne-tfresult", "5"), ("x-ne-message", "blocked")]))
                .unwrap_err();
        assert!(matches!(err, VpnError::Authentication(_)));
        assert_eq!(err.to_string(), "blocked");
    }

    #[test]
    fn test_login_result_default_denial() {
        let err = check_login_result(&headers(&[("x-ne-tfresult", "5")])).unwrap_err();
        assert_eq!(err.to_string(), DEFAULT_DENIAL);

        let err = check_login_result(&headers(&[("x-ne-tfresult", "-1"), ("x-ne-message", "")]))
            .unwrap_err();
        assert_eq!(err.to_string(), DEFAULT_DENIAL);
    }

    #[test]
    fn test_login_result_format_error() {
        let err = check_login_result(&headers(&[("x-ne-tfresult", "denied")])).unwrap_err();
        assert!(matches!(err, VpnError::Protocol(_)));
        assert_ne!(err.to_string(), DEFAULT_DENIAL);

        let err = check_login_result(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, VpnError::Protocol(_)));
    }

    /// Serve one canned HTTP response and hand back the raw request
    async fn serve_once(response: String) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });
        (port, handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data).into_owned();
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if data.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&data).into_owned()
    }

    fn client_for(port: u16) -> AuthClient {
        let mut config = Config::for_gateway("127.0.0.1", port);
        config.server.use_ssl = false;
        config.server.timeout = 5;
        let tls = TlsConfig::new(&config.server).unwrap();
        AuthClient::new(&config.server, &tls).unwrap()
    }

    #[tokio::test]
    async fn test_login_request_and_refusal() {
        let (port, server) = serve_once(
            "HTTP/1.1 200 OK\r\nX-NE-tfresult: 5\r\nX-NE-message: blocked\r\n\
             Content-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string(),
        )
        .await;

        let err = client_for(port)
            .login("alice", "s3cret", "LocalDomain")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "blocked");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /cgi-bin/userLogin HTTP/1.1\r\n"));
        assert!(request.contains(USER_AGENT));
        assert!(request.to_ascii_lowercase().contains("x-ne-pda: true"));
        assert!(request
            .to_ascii_lowercase()
            .contains("content-type: application/x-www-form-urlencoded"));
        assert!(request.ends_with("username=alice&password=s3cret&domain=LocalDomain&login=true"));
    }

    #[tokio::test]
    async fn test_login_success() {
        let (port, server) = serve_once(
            "HTTP/1.1 200 OK\r\nX-NE-tfresult: 0\r\nSet-Cookie: swap=early; path=/\r\n\
             Content-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string(),
        )
        .await;

        assert!(client_for(port).login("alice", "pw", "Local").await.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_session() {
        let body = "Route=10.0.0.0/24;\nRoute=10.1.0.0/24;\ndns1=8.8.8.8;\nSessionId=abc;\nUnknownKey=z;\n";
        let response = format!(
            "HTTP/1.1 200 OK\r\nSet-Cookie: swap=TOK123; path=/\r\n\
             Content-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let (port, server) = serve_once(response).await;

        let session = client_for(port).bootstrap_session().await.unwrap();
        assert_eq!(session.routes(), ["10.0.0.0/24", "10.1.0.0/24"]);
        assert_eq!(session.nameservers(), ["8.8.8.8"]);
        assert_eq!(session.token(), "TOK123");

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "GET /cgi-bin/sslvpnclient?launchplatform=mac&neProto=3&supportipv6=yes HTTP/1.1\r\n"
        ));
        assert!(request.to_ascii_lowercase().contains("x-ne-pda: true"));
    }

    #[tokio::test]
    async fn test_bootstrap_without_cookie_leaves_token_empty() {
        let (port, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 12\r\nConnection: close\r\n\r\nRoute=1.2.3."
            .to_string(),
        )
        .await;

        let session = client_for(port).bootstrap_session().await.unwrap();
        assert!(!session.has_token());
        assert_eq!(session.routes(), ["1.2.3."]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_ignores_status() {
        let (port, server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 3\r\nConnection: close\r\n\r\nnxx"
            .to_string(),
        )
        .await;

        assert!(client_for(port).probe_capabilities().await.is_ok());
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /cgi-bin/sslvpnclient?epcversionquery=nxx HTTP/1.1\r\n"));
    }

    #[tokio::test]
    async fn test_logout_sends_placeholder_body() {
        let (port, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            .to_string(),
        )
        .await;

        assert!(client_for(port).logout().await.is_ok());
        let request = server.await.unwrap();
        assert!(request.starts_with("POST /cgi-bin/userLogout HTTP/1.1\r\n"));
        assert!(request.ends_with("\r\n\r\n "));
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        // bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = client_for(port).probe_capabilities().await.unwrap_err();
        assert!(matches!(err, VpnError::Network(_)));
    }
}

//! Opening a session with the first reachable mail server.

use std::time::Duration;

use envoi_common::internal;
use tokio::{net::TcpStream, time::timeout};
use url::Url;

use crate::{
    client::{Response, SmtpClient},
    error::DialError,
    socks::{self, Credentials},
};

const DEFAULT_PORTS: [u16; 2] = [25, 587];
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_SOCKS_PORT: u16 = 1080;

/// How TCP connections are opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Dialer {
    #[default]
    Direct,
    /// Tunnel through a SOCKS5 proxy at `proxy` (`host:port`).
    Socks5 {
        proxy: (String, u16),
        credentials: Option<Credentials>,
    },
}

impl Dialer {
    /// Build a dialer from an optional proxy URL of the form
    /// `socks5://[user:pass@]host[:port]`.
    ///
    /// `socks5h` is accepted as a synonym. With either scheme host names
    /// are resolved by the proxy; only IP literals go out as addresses.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::InvalidProxy`] if the URL cannot be parsed or
    /// names a scheme other than SOCKS5.
    pub fn from_proxy(url: Option<&str>) -> Result<Self, DialError> {
        let Some(raw) = url.map(str::trim).filter(|url| !url.is_empty()) else {
            return Ok(Self::Direct);
        };
        let invalid = |reason: String| DialError::InvalidProxy {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "socks5" | "socks5h") {
            return Err(invalid(format!("unsupported scheme {}", url.scheme())));
        }

        let host = url
            .host_str()
            .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let port = url.port().unwrap_or(DEFAULT_SOCKS_PORT);

        let credentials = (!url.username().is_empty()).then(|| Credentials {
            username: url.username().to_string(),
            password: url.password().unwrap_or_default().to_string(),
        });

        Ok(Self::Socks5 {
            proxy: (host, port),
            credentials,
        })
    }

    /// Open a TCP stream to `host:port`, through the proxy if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or proxy handshake fails.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, DialError> {
        match self {
            Self::Direct => Ok(TcpStream::connect((host, port)).await?),
            Self::Socks5 { proxy, credentials } => {
                let mut stream = TcpStream::connect((proxy.0.as_str(), proxy.1)).await?;
                socks::connect(&mut stream, host, port, credentials.as_ref()).await?;
                Ok(stream)
            }
        }
    }
}

/// An open session, greeted and ready for HELO.
pub struct Connection {
    pub client: SmtpClient,
    /// Host the session is bound to, used as the TLS server name.
    pub host: String,
    pub port: u16,
    pub greeting: Response,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("greeting", &self.greeting)
            .finish_non_exhaustive()
    }
}

/// Which ports to try, and how long each attempt may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialPlan {
    pub ports: Vec<u16>,
    /// Deadline covering the TCP connect and the greeting.
    pub attempt_timeout: Duration,
}

impl Default for DialPlan {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl DialPlan {
    /// Try every host on the first port, then every host on the next, and
    /// return the first session that greets successfully.
    ///
    /// # Errors
    ///
    /// Returns [`DialError::NoReachableServer`] when every attempt failed.
    pub async fn dial_from_list(
        &self,
        hosts: &[String],
        dialer: &Dialer,
    ) -> Result<Connection, DialError> {
        for &port in &self.ports {
            for host in hosts {
                match self.attempt(host, port, dialer).await {
                    Ok(connection) => {
                        internal!(level = DEBUG, "Connected to {host}:{port}");
                        return Ok(connection);
                    }
                    Err(err) => {
                        internal!(level = DEBUG, "Unable to reach {host}:{port}: {err}");
                    }
                }
            }
        }

        Err(DialError::NoReachableServer {
            hosts: hosts.join(", "),
        })
    }

    async fn attempt(
        &self,
        host: &str,
        port: u16,
        dialer: &Dialer,
    ) -> Result<Connection, DialError> {
        timeout(self.attempt_timeout, async {
            let stream = dialer.connect(host, port).await?;
            let mut client = SmtpClient::from_stream(stream, host);

            let greeting = client.read_greeting().await?;
            if !greeting.is_success() {
                return Err(DialError::Greeting(greeting.to_string()));
            }

            Ok::<_, DialError>(Connection {
                client,
                host: host.to_string(),
                port,
                greeting,
            })
        })
        .await
        .map_err(|_| DialError::Timeout)?
    }
}

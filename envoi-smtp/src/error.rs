use std::io;

use thiserror::Error;

use crate::client::ClientError;

/// Errors raised while establishing a session with a mail server.
#[derive(Debug, Error)]
pub enum DialError {
    /// Every host was tried on every port without success.
    #[error("No reachable mail server among [{hosts}]")]
    NoReachableServer { hosts: String },

    /// The configured proxy URL could not be used.
    #[error("Invalid proxy {url}: {reason}")]
    InvalidProxy { url: String, reason: String },

    /// The proxy refused or failed the handshake.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// The server did not greet with a 2xx reply.
    #[error("Unexpected greeting: {0}")]
    Greeting(String),

    /// The attempt did not finish before its deadline.
    #[error("Timed out")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),
}

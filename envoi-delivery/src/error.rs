//! Typed error handling for delivery operations.
//!
//! Every failure on the delivery path maps onto one [`DeliveryError`]
//! variant. Which of them are fatal to the whole invocation and which only
//! to one destination domain is decided by the caller, see
//! [`DeliveryProcessor`](crate::DeliveryProcessor).

use envoi_common::{CommandError, ConfigError, ParseError};
use envoi_smtp::{DialError, client::ClientError};
use envoi_spool::SpoolError;
use thiserror::Error;

use crate::DnsError;

/// The SMTP step a protocol error happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Helo,
    StartTls,
    MailFrom,
    RcptTo,
    Data,
    Quit,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Helo => "HELO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Quit => "QUIT",
        })
    }
}

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The message or an address list could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// DNS infrastructure failure. A domain without MX records is not one.
    #[error(transparent)]
    Resolver(#[from] DnsError),

    /// No mail server could be reached.
    #[error(transparent)]
    Dial(#[from] DialError),

    /// The server rejected a command, or the session broke down mid-command.
    #[error("{stage} failed: {code} {message}")]
    Protocol {
        stage: Stage,
        code: u16,
        message: String,
    },

    /// DKIM signing failed. Unsigned mail is never sent when signing is
    /// configured.
    #[error("Signing failed: {0}")]
    Sign(String),

    #[error("Sanitizing failed: {0}")]
    Sanitize(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Queue(#[from] SpoolError),

    /// Delegated delivery finished without delivering every recipient.
    #[error("Delivery incomplete: {0}")]
    Incomplete(String),
}

impl DeliveryError {
    /// A protocol error for a rejected reply.
    #[must_use]
    pub fn rejected(stage: Stage, response: &envoi_smtp::client::Response) -> Self {
        Self::Protocol {
            stage,
            code: response.code,
            message: response.lines.join(" "),
        }
    }

    /// A protocol error for a session that failed before any reply was read.
    #[must_use]
    pub fn broken(stage: Stage, err: &ClientError) -> Self {
        Self::Protocol {
            stage,
            code: 0,
            message: err.to_string(),
        }
    }
}

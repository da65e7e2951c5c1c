//! Outbound delivery: preparing a message and handing it to the mail
//! servers of each destination domain.
//!
//! This crate provides:
//! - Header sanitizing and DKIM signing ([`transform`])
//! - MX resolution for destination domains ([`dns`])
//! - The SMTP session run against each domain ([`session`])
//! - The status-line protocol used by delegated delivery ([`status`])
//! - Direct and delegated delivery ([`processor`])
//! - The processor boundary of relay mode ([`relay`])

pub mod dns;
mod error;
pub mod processor;
pub mod relay;
pub mod session;
pub mod status;
pub mod transform;

pub use dns::{DnsError, DnsResolver, MailServerLookup};
pub use error::{DeliveryError, Stage};
pub use processor::{DelegatedSender, DeliveryProcessor, DeliveryReport};
pub use relay::RelayProcessor;
pub use session::{SessionOptions, SmtpSession};
pub use status::{Interpretation, StatusLine, interpret};
pub use transform::prepare;

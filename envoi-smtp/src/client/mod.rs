//! A minimal SMTP client: plain TCP with an optional STARTTLS upgrade.
//!
//! ```no_run
//! use envoi_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("mx.example.com:25", "mx.example.com").await?;
//! client.read_greeting().await?;
//! client.ehlo("client.example.org").await?;
//! client.mail_from("sender@example.org").await?;
//! client.rcpt_to("recipient@example.com").await?;
//! client.data().await?;
//! client.send_data(b"Subject: Test\r\n\r\nHello World").await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;
mod tls;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::{SmtpClient, dot_stuff};
pub use tls::TlsOptions;

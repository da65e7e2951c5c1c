//! One SMTP transaction against one destination domain.
//!
//! The session runs on a connection that is already greeted:
//! - EHLO, falling back to HELO
//! - STARTTLS and a second EHLO, unless TLS is disabled
//! - MAIL FROM, then RCPT TO for each recipient at the domain
//! - DATA with the dot-stuffed content
//! - QUIT

use envoi_common::{DomainConfig, ParsedMessage, internal};
use envoi_smtp::{
    Connection,
    client::{ClientError, Response, SmtpClient, TlsOptions},
};

use crate::error::{DeliveryError, Stage};

/// How STARTTLS is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upgrade with STARTTLS before MAIL FROM. A refusal is fatal.
    pub tls: bool,
    /// Accept certificates that do not verify, such as self-signed ones.
    pub accept_invalid_certs: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            tls: true,
            accept_invalid_certs: false,
        }
    }
}

/// Delivery of one message to the recipients at one destination domain.
pub struct SmtpSession<'a> {
    message: &'a ParsedMessage,
    domain: &'a str,
    config: &'a DomainConfig,
    options: SessionOptions,
}

/// Map a client failure or a non-success reply at `stage` to an error.
fn expect_success(
    stage: Stage,
    reply: Result<Response, ClientError>,
) -> Result<Response, DeliveryError> {
    match reply {
        Ok(response) if response.is_success() => Ok(response),
        Ok(response) => Err(DeliveryError::rejected(stage, &response)),
        Err(err) => Err(DeliveryError::broken(stage, &err)),
    }
}

impl<'a> SmtpSession<'a> {
    #[must_use]
    pub const fn new(
        message: &'a ParsedMessage,
        domain: &'a str,
        config: &'a DomainConfig,
        options: SessionOptions,
    ) -> Self {
        Self {
            message,
            domain,
            config,
            options,
        }
    }

    /// The name announced in EHLO/HELO.
    fn helo_name(&self) -> &str {
        self.config
            .source_host
            .as_deref()
            .unwrap_or_else(|| self.message.source_domain())
    }

    /// Run the transaction and return the recipients the server accepted.
    ///
    /// Rejected recipients are skipped. The session fails without sending
    /// DATA when none are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Protocol`] naming the failed stage.
    #[tracing::instrument(level = "info", skip_all, fields(domain = %self.domain, server = %connection.host))]
    pub async fn execute(self, connection: Connection) -> Result<Vec<String>, DeliveryError> {
        let Connection { mut client, .. } = connection;

        self.greet(&mut client).await?;
        if self.options.tls {
            self.negotiate_tls(&mut client).await?;
        }

        expect_success(
            Stage::MailFrom,
            client.mail_from(&self.message.sender()).await,
        )?;

        let accepted = self.send_rcpt_to(&mut client).await?;
        if accepted.is_empty() {
            if let Err(err) = client.quit().await {
                internal!(level = DEBUG, "QUIT after refused recipients failed: {err}");
            }
            return Err(DeliveryError::Protocol {
                stage: Stage::RcptTo,
                code: 0,
                message: format!("no recipients at {} were accepted", self.domain),
            });
        }

        self.send_message_data(&mut client).await?;
        expect_success(Stage::Quit, client.quit().await)?;

        Ok(accepted)
    }

    async fn greet(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        let name = self.helo_name();
        match client.ehlo(name).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => {
                internal!(level = DEBUG, "EHLO rejected ({response}), trying HELO");
                expect_success(Stage::Helo, client.helo(name).await).map(|_| ())
            }
            Err(err) => Err(DeliveryError::broken(Stage::Helo, &err)),
        }
    }

    async fn negotiate_tls(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        if self.options.accept_invalid_certs {
            internal!(
                level = WARN,
                "TLS certificate validation is disabled for {}",
                client.server_domain()
            );
        }

        client.set_tls_options(TlsOptions {
            accept_invalid_certs: self.options.accept_invalid_certs,
            client_cert: self
                .config
                .client_certificate()
                .map(|(cert, key)| (cert.to_path_buf(), key.to_path_buf())),
        });

        expect_success(Stage::StartTls, client.starttls().await)?;
        self.greet(client).await
    }

    async fn send_rcpt_to(&self, client: &mut SmtpClient) -> Result<Vec<String>, DeliveryError> {
        let mut accepted = Vec::new();

        for recipient in self.message.recipients_for(self.domain).into_iter().flatten() {
            let response = client
                .rcpt_to(recipient)
                .await
                .map_err(|err| DeliveryError::broken(Stage::RcptTo, &err))?;

            if response.is_success() {
                accepted.push(recipient.clone());
            } else {
                internal!(
                    level = WARN,
                    "Recipient {recipient} rejected: {response}"
                );
            }
        }

        Ok(accepted)
    }

    async fn send_message_data(&self, client: &mut SmtpClient) -> Result<(), DeliveryError> {
        match client.data().await {
            Ok(response) if response.is_intermediate() => {}
            Ok(response) => return Err(DeliveryError::rejected(Stage::Data, &response)),
            Err(err) => return Err(DeliveryError::broken(Stage::Data, &err)),
        }

        expect_success(Stage::Data, client.send_data(self.message.bytes()).await)?;
        Ok(())
    }
}

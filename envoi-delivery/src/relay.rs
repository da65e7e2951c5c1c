//! Forwarding messages received by an inbound SMTP server.
//!
//! The server itself is not part of this crate. It calls
//! [`RelayProcessor::on_validate_recipient`] for each `RCPT TO` and
//! [`RelayProcessor::on_save_message`] once the message is received.

use std::{io, sync::Arc};

use envoi_common::{Address, CommandRunner, Config, ParsedMessage, internal};
use envoi_smtp::DialPlan;

use crate::{
    DeliveryError,
    dns::MailServerLookup,
    processor::{DeliveryProcessor, DeliveryReport},
    session::SessionOptions,
    transform,
};

/// Signs and forwards relayed messages using the relay settings.
#[derive(Clone)]
pub struct RelayProcessor {
    config: Arc<Config>,
    delivery: DeliveryProcessor,
    runner: Arc<dyn CommandRunner>,
}

impl RelayProcessor {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<dyn MailServerLookup>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let delivery = DeliveryProcessor::new(resolver).with_options(SessionOptions {
            tls: config.relay.tls,
            accept_invalid_certs: config.relay.self_signed,
        });

        Self {
            config,
            delivery,
            runner,
        }
    }

    #[must_use]
    pub fn with_plan(mut self, plan: DialPlan) -> Self {
        self.delivery = self.delivery.with_plan(plan);
        self
    }

    /// Whether to accept a recipient offered in `RCPT TO`.
    ///
    /// Every well-formed address is accepted. With a recipient override
    /// configured the address is accepted and later replaced.
    #[must_use]
    pub fn on_validate_recipient(&self, recipient: &str) -> bool {
        match Address::parse(recipient) {
            Ok(_) => true,
            Err(err) => {
                internal!(level = DEBUG, "Refusing recipient {recipient}: {err}");
                false
            }
        }
    }

    /// Sign a received message when its domain has a key, apply the
    /// recipient override, and deliver it directly.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be parsed, its domain has no
    /// configuration, signing fails, or nothing could be attempted.
    /// Per-domain delivery failures are in the report.
    pub async fn on_save_message(&self, raw: Vec<u8>) -> Result<DeliveryReport, DeliveryError> {
        let mut message = ParsedMessage::parse(raw)?;
        let domain = self.config.domain(message.source_domain())?;

        if domain.signs() {
            transform::sign(&mut message, domain, self.runner.as_ref()).await?;
        }

        if let Some(recipients) = self.config.relay.recipients.as_deref() {
            internal!(level = INFO, "Overriding recipients to {recipients}");
            message.set_recipients(recipients)?;
        }

        let report = self
            .delivery
            .deliver(&message, domain, &mut io::sink())
            .await?;

        internal!(
            level = INFO,
            "Relayed {} to {} recipient(s), {} domain(s) failed",
            message.hash(),
            report.delivered.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

//! Delivering a prepared message.
//!
//! [`DeliveryProcessor`] speaks SMTP to each destination domain itself and
//! reports progress as status lines. [`DelegatedSender`] hands the message
//! to the configured send command and reads those status lines back.

use std::{io::Write, sync::Arc};

use envoi_common::{
    CommandError, CommandRunner, DomainConfig, ParsedMessage, RECIPIENTS_ENV,
    command::split_command, internal,
};
use envoi_smtp::{DialPlan, Dialer};

use crate::{
    DeliveryError,
    dns::MailServerLookup,
    session::{SessionOptions, SmtpSession},
    status::{StatusLine, interpret},
};

/// The outcome of delivering one message to all of its domains.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Recipients the servers accepted, across all domains.
    pub delivered: Vec<String>,
    /// Domains that failed, with the reason.
    pub failed: Vec<(String, DeliveryError)>,
}

impl DeliveryReport {
    /// Returns `true` when no domain failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn summary(&self) -> String {
        self.failed
            .iter()
            .map(|(domain, err)| format!("{domain}: {err}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// The first domain failure, if any.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failed domain.
    pub fn into_result(self) -> Result<Vec<String>, DeliveryError> {
        match self.failed.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(self.delivered),
        }
    }
}

/// Write a status line, logging rather than failing if the sink is gone.
fn emit(out: &mut dyn Write, line: &StatusLine) {
    if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
        internal!(level = WARN, "Unable to write status line {line}: {err}");
    }
}

/// Direct SMTP delivery, one destination domain at a time.
#[derive(Clone)]
pub struct DeliveryProcessor {
    resolver: Arc<dyn MailServerLookup>,
    plan: DialPlan,
    options: SessionOptions,
}

impl DeliveryProcessor {
    #[must_use]
    pub fn new(resolver: Arc<dyn MailServerLookup>) -> Self {
        Self {
            resolver,
            plan: DialPlan::default(),
            options: SessionOptions::default(),
        }
    }

    #[must_use]
    pub fn with_plan(mut self, plan: DialPlan) -> Self {
        self.plan = plan;
        self
    }

    #[must_use]
    pub const fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Deliver `message` to every destination domain in turn, writing
    /// status lines to `out`.
    ///
    /// A domain that fails is reported with an `Info` line and delivery
    /// carries on with the next domain. Each success is reported with a
    /// `Delivered` line. If any domain failed, a single `Fatal` line closes
    /// the output, so every `Delivered` line precedes it.
    ///
    /// # Errors
    ///
    /// Returns an error only when nothing can be attempted at all, such as
    /// an unusable proxy setting. Per-domain failures are in the report.
    #[tracing::instrument(level = "info", skip_all, fields(message = %message.hash()))]
    pub async fn deliver(
        &self,
        message: &ParsedMessage,
        config: &DomainConfig,
        out: &mut (dyn Write + Send),
    ) -> Result<DeliveryReport, DeliveryError> {
        let dialer = Dialer::from_proxy(config.dialer_proxy.as_deref())?;
        let mut report = DeliveryReport::default();

        for domain in message.destination_domains() {
            emit(out, &StatusLine::Info(format!("Delivering to {domain}")));

            match self.deliver_domain(message, domain, config, &dialer, out).await {
                Ok(accepted) => {
                    emit(out, &StatusLine::Delivered(accepted.join(", ")));
                    report.delivered.extend(accepted);
                }
                Err(err) => {
                    internal!(level = WARN, "Delivery to {domain} failed: {err}");
                    emit(
                        out,
                        &StatusLine::Info(format!("Delivery to {domain} failed: {err}")),
                    );
                    report.failed.push((domain.to_string(), err));
                }
            }
        }

        if !report.is_complete() {
            emit(out, &StatusLine::Fatal(report.summary()));
        }

        Ok(report)
    }

    async fn deliver_domain(
        &self,
        message: &ParsedMessage,
        domain: &str,
        config: &DomainConfig,
        dialer: &Dialer,
        out: &mut (dyn Write + Send),
    ) -> Result<Vec<String>, DeliveryError> {
        let hosts = self.resolver.find_servers(domain).await?;
        let connection = self.plan.dial_from_list(&hosts, dialer).await?;

        emit(
            out,
            &StatusLine::Info(format!(
                "Connected to {}:{}",
                connection.host, connection.port
            )),
        );

        SmtpSession::new(message, domain, config, self.options)
            .execute(connection)
            .await
    }
}

/// Delivery through the configured send command.
///
/// The command gets the message on stdin and the pending recipients in
/// `ENVOI_RECIPIENTS`, and is expected to answer in status lines.
#[derive(Clone)]
pub struct DelegatedSender {
    runner: Arc<dyn CommandRunner>,
}

impl DelegatedSender {
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run the send command for `message` and remove every recipient it
    /// reports as delivered.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Command`] if the command cannot run or exits
    /// unsuccessfully, carrying its output, and
    /// [`DeliveryError::Incomplete`] if it reported a fatal failure.
    pub async fn send(
        &self,
        message: &mut ParsedMessage,
        config: &DomainConfig,
    ) -> Result<(), DeliveryError> {
        let argv = split_command(&config.send_command)?;
        let env = [(RECIPIENTS_ENV.to_string(), message.recipients())];

        internal!(
            level = DEBUG,
            "Handing {} to {} for {}",
            message.hash(),
            config.send_command,
            message.recipients()
        );

        let output = self.runner.run(&argv, message.bytes(), &env).await?;
        let combined = output.combined();
        let result = interpret(&combined, message);

        if !output.success() {
            return Err(CommandError::Failed {
                command: config.send_command.clone(),
                status: output.status(),
                output: combined.trim().to_string(),
            }
            .into());
        }
        if let Some(reason) = result.fatal {
            return Err(DeliveryError::Incomplete(reason));
        }
        if message.has_recipients() {
            internal!(
                level = WARN,
                "{} finished without reporting {}",
                config.send_command,
                message.recipients()
            );
        }

        Ok(())
    }
}

//! Preparing messages and handing them to the send command, with the queue
//! as a fallback.

use std::sync::Arc;

use envoi_common::{CommandRunner, Config, ParsedMessage, internal};
use envoi_delivery::{DelegatedSender, DeliveryError};
use envoi_spool::{MessageQueue, SpoolError};

/// Counts from one pass over the queue.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResumeSummary {
    pub delivered: usize,
    pub requeued: usize,
}

/// Signs outgoing mail and delegates its delivery.
pub struct Signer {
    config: Config,
    runner: Arc<dyn CommandRunner>,
    sender: DelegatedSender,
}

impl Signer {
    #[must_use]
    pub fn new(config: Config, runner: Arc<dyn CommandRunner>) -> Self {
        let sender = DelegatedSender::new(Arc::clone(&runner));
        Self {
            config,
            runner,
            sender,
        }
    }

    /// Sanitize and sign `message` with the settings of its source domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the source domain is not configured or a
    /// transform fails.
    pub async fn prepare(&self, message: &mut ParsedMessage) -> Result<(), DeliveryError> {
        let domain = self.config.domain(message.source_domain())?;
        envoi_delivery::prepare(message, domain, self.runner.as_ref()).await
    }

    /// Run the send command once. Recipients it reports as delivered are
    /// removed from `message` even when the attempt fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the source domain is not configured or the send
    /// command fails.
    pub async fn try_send(&self, message: &mut ParsedMessage) -> Result<(), DeliveryError> {
        let domain = self.config.domain(message.source_domain())?;
        self.sender.send(message, domain).await
    }

    /// Append `message` to the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written.
    pub async fn enqueue(&self, message: ParsedMessage) -> Result<(), SpoolError> {
        let mut queue = MessageQueue::load(self.config.location()).await?;
        internal!(
            level = INFO,
            "Queueing {} for {}",
            message.hash(),
            message.recipients()
        );
        queue.push(message);
        queue.save().await
    }

    /// Try every queued message once, in order.
    ///
    /// Delivered messages are removed. The rest are queued again with only
    /// the recipients still pending.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be read or written. A failed
    /// delivery is not an error.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn resume(&self) -> Result<ResumeSummary, SpoolError> {
        let queue = MessageQueue::load(self.config.location()).await?;
        let mut retained = MessageQueue::new(queue.location());
        let mut summary = ResumeSummary::default();

        for mut message in queue {
            match self.try_send(&mut message).await {
                Ok(()) => {
                    summary.delivered += 1;
                    if let Err(err) = retained.unlink(&message).await {
                        internal!(level = WARN, "Failed to remove queued message: {err}");
                    }
                }
                Err(err) => {
                    internal!(level = WARN, "Delivery failure for {}: {err}", message.hash());
                    summary.requeued += 1;
                    retained.push(message);
                }
            }
        }

        retained.save().await?;
        Ok(summary)
    }
}

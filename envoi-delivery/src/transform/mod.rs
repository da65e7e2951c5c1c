//! Rewriting a message before it leaves: sanitize, then DKIM sign.

pub mod canon;
pub mod sanitize;
pub mod sign;

use envoi_common::{CommandRunner, DomainConfig, ParsedMessage};

pub use sanitize::{sanitize, sanitize_at};
pub use sign::{DkimKey, DkimSigner, sign};

use crate::DeliveryError;

/// Sanitize `message`, then sign it when the domain has a DKIM key command.
///
/// # Errors
///
/// Returns the first transform error. The message must not be sent unsigned
/// after a signing failure.
pub async fn prepare(
    message: &mut ParsedMessage,
    config: &DomainConfig,
    runner: &dyn CommandRunner,
) -> Result<(), DeliveryError> {
    sanitize(message)?;
    if config.signs() {
        sign(message, config, runner).await?;
    }
    Ok(())
}

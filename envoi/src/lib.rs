//! Shared plumbing for the `envoi-send` and `envoi-sign` binaries.

mod signer;

use tokio::io::{AsyncRead, AsyncReadExt};

pub use signer::{ResumeSummary, Signer};

/// Read a whole message from `input`.
///
/// # Errors
///
/// Returns an error if reading fails.
pub async fn read_message<R: AsyncRead + Unpin + Send>(mut input: R) -> std::io::Result<Vec<u8>> {
    let mut message = Vec::new();
    input.read_to_end(&mut message).await?;
    Ok(message)
}

//! Sign a message read from stdin and hand it to the configured send
//! command, or retry the queue.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use envoi::{Signer, read_message};
use envoi_common::{Config, ParsedMessage, SystemCommand, internal, logging};

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

/// Sign outgoing mail and hand it to the send command
#[derive(Parser, Debug)]
#[command(name = "envoi-sign", long_about = None)]
#[command(version)]
struct Cli {
    /// Store the message in the queue if it is not sent successfully
    #[arg(short = 's', long)]
    queue: bool,

    /// Attempt delivery of queued messages
    #[arg(short, long)]
    resume: bool,

    /// Use an explicit sender instead of the address in From
    #[arg(short, long)]
    from: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = Config::discover()?;
    let signer = Signer::new(config, Arc::new(SystemCommand));

    if cli.resume {
        let summary = signer.resume().await.context("Failed to resume queue")?;
        internal!(
            level = INFO,
            "Delivered {} queued message(s), {} still queued",
            summary.delivered,
            summary.requeued
        );
        return Ok(());
    }

    let raw = read_message(tokio::io::stdin())
        .await
        .context("Failed to read message")?;
    let mut message = ParsedMessage::parse(raw)?;
    if let Some(from) = cli.from.as_deref() {
        message
            .set_sender(from)
            .context("Failed to prepare message")?;
    }
    signer
        .prepare(&mut message)
        .await
        .context("Failed to prepare message")?;

    match signer.try_send(&mut message).await {
        Ok(()) => Ok(()),
        Err(err) if cli.queue => {
            internal!(level = WARN, "Failed to send message: {err}");
            signer
                .enqueue(message)
                .await
                .context("Failed to queue message")
        }
        Err(err) => Err(err).context("Failed to send message"),
    }
}

//! Deliver a message read from stdin straight to the mail servers of its
//! recipients, reporting progress as status lines on stdout.

use std::{env, io, sync::Arc};

use anyhow::Context;
use clap::Parser;
use envoi::read_message;
use envoi_common::{Config, ParsedMessage, RECIPIENTS_ENV, internal, logging};
use envoi_delivery::{DeliveryProcessor, DnsResolver};

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

/// Deliver a message over SMTP
#[derive(Parser, Debug)]
#[command(name = "envoi-send", long_about = None)]
#[command(version)]
struct Cli {
    /// Accepted for sendmail compatibility and ignored
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    ignored: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();
    if !cli.ignored.is_empty() {
        internal!(level = DEBUG, "Ignoring arguments {:?}", cli.ignored);
    }

    let config = Config::discover()?;

    let raw = read_message(tokio::io::stdin())
        .await
        .context("Failed to read message")?;
    let mut message = ParsedMessage::parse(raw)?;

    if let Ok(recipients) = env::var(RECIPIENTS_ENV)
        && !recipients.trim().is_empty()
    {
        message
            .set_recipients(&recipients)
            .with_context(|| format!("Invalid {RECIPIENTS_ENV}"))?;
    }

    let domain = config.domain(message.source_domain())?;
    let domains = message.destination_domains().count();
    let resolver = Arc::new(DnsResolver::new()?);
    let report = DeliveryProcessor::new(resolver)
        .deliver(&message, domain, &mut io::stdout())
        .await?;

    let failed = report.failed.len();
    let delivered = report
        .into_result()
        .with_context(|| format!("Delivery failed for {failed} of {domains} domain(s)"))?;
    internal!(level = INFO, "Delivered to {}", delivered.join(", "));

    Ok(())
}

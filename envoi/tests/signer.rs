//! Tests for signing, delegated sending and the queue fallback, with a fake
//! send command standing in for a remote `envoi-send`.
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use envoi::{ResumeSummary, Signer, read_message};
use envoi_common::{
    CommandError, CommandOutput, CommandRunner, Config, ParsedMessage, RECIPIENTS_ENV,
};
use envoi_delivery::DeliveryError;
use envoi_spool::{MessageQueue, QUEUE_FILE};
use pretty_assertions::assert_eq;

const MESSAGE: &str = "From: Alice <alice@example.com>\r\n\
                       To: bob@good.test, carol@down.test\r\n\
                       Subject: Quarterly numbers\r\n\
                       \r\n\
                       See attached.\r\n";

/// Delivers every pending recipient except those at `down.test`.
#[derive(Default)]
struct FakeRelay {
    down: Mutex<bool>,
    calls: Mutex<Vec<(Vec<String>, Vec<u8>, String)>>,
}

impl FakeRelay {
    fn with_outage() -> Self {
        Self {
            down: Mutex::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn recover(&self) {
        *self.down.lock().unwrap() = false;
    }

    fn calls(&self) -> Vec<(Vec<String>, Vec<u8>, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRelay {
    async fn run(
        &self,
        argv: &[String],
        stdin: &[u8],
        env: &[(String, String)],
    ) -> Result<CommandOutput, CommandError> {
        let recipients = env
            .iter()
            .find(|(name, _)| name == RECIPIENTS_ENV)
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        self.calls
            .lock()
            .unwrap()
            .push((argv.to_vec(), stdin.to_vec(), recipients.clone()));

        let down = *self.down.lock().unwrap();
        let (delivered, failed): (Vec<&str>, Vec<&str>) = recipients
            .split(", ")
            .filter(|addr| !addr.is_empty())
            .partition(|addr| !(down && addr.ends_with("@down.test")));

        let mut stdout = String::new();
        if !delivered.is_empty() {
            stdout.push_str(&format!("Delivered: {}\n", delivered.join(", ")));
        }
        if !failed.is_empty() {
            stdout.push_str("Fatal: down.test: connection refused\n");
        }

        Ok(CommandOutput {
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
            code: Some(i32::from(!failed.is_empty())),
        })
    }
}

fn config(location: &std::path::Path) -> Config {
    Config::parse(
        r#"Envoi(
            domains: {
                "example.com": (send_command: "ssh relay envoi-send"),
            },
        )"#,
    )
    .unwrap()
    .with_location(location)
}

fn message() -> ParsedMessage {
    ParsedMessage::parse(MESSAGE.as_bytes().to_vec()).unwrap()
}

#[tokio::test]
async fn test_read_message_reads_everything() {
    let raw = read_message(MESSAGE.as_bytes()).await.unwrap();
    assert_eq!(raw, MESSAGE.as_bytes());
}

#[tokio::test]
async fn test_try_send_hands_message_to_send_command() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Arc::new(FakeRelay::default());
    let signer = Signer::new(config(dir.path()), relay.clone());
    let mut message = message();

    signer.prepare(&mut message).await.unwrap();
    signer.try_send(&mut message).await.unwrap();

    assert!(!message.has_recipients());
    let calls = relay.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, ["ssh", "relay", "envoi-send"]);
    assert!(String::from_utf8_lossy(&calls[0].1).contains("Subject: Quarterly numbers"));
    assert_eq!(calls[0].2, "carol@down.test, bob@good.test");
}

#[tokio::test]
async fn test_failed_send_keeps_pending_recipients() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Arc::new(FakeRelay::with_outage());
    let signer = Signer::new(config(dir.path()), relay);
    let mut message = message();

    let err = signer.try_send(&mut message).await.unwrap_err();

    assert!(matches!(err, DeliveryError::Command(CommandError::Failed { .. })));
    assert_eq!(message.recipients(), "carol@down.test");
}

#[tokio::test]
async fn test_unknown_sender_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let signer = Signer::new(config(dir.path()), Arc::new(FakeRelay::default()));
    let mut message = message();
    message.set_sender("mallory@elsewhere.test").unwrap();

    let err = signer.prepare(&mut message).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Config(_)));
}

#[tokio::test]
async fn test_enqueue_then_resume() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Arc::new(FakeRelay::with_outage());
    let signer = Signer::new(config(dir.path()), relay.clone());
    let mut message = message();

    signer.try_send(&mut message).await.unwrap_err();
    signer.enqueue(message.clone()).await.unwrap();

    let queued = MessageQueue::load(dir.path()).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert!(dir.path().join(message.file_name()).is_file());

    // Still down: the message stays queued for the same recipient
    let summary = signer.resume().await.unwrap();
    assert_eq!(
        summary,
        ResumeSummary {
            delivered: 0,
            requeued: 1
        }
    );
    let queued: Vec<ParsedMessage> = MessageQueue::load(dir.path())
        .await
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(queued[0].recipients(), "carol@down.test");

    relay.recover();
    let summary = signer.resume().await.unwrap();
    assert_eq!(
        summary,
        ResumeSummary {
            delivered: 1,
            requeued: 0
        }
    );

    // bob was never offered again after his first delivery
    let offered: Vec<String> = relay.calls().into_iter().map(|call| call.2).collect();
    assert_eq!(
        offered,
        [
            "carol@down.test, bob@good.test",
            "carol@down.test",
            "carol@down.test",
        ]
    );
    assert!(!dir.path().join(message.file_name()).exists());
    assert!(!dir.path().join(QUEUE_FILE).exists());
    assert!(MessageQueue::load(dir.path()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_with_empty_queue() {
    let dir = tempfile::tempdir().unwrap();
    let relay = Arc::new(FakeRelay::default());
    let signer = Signer::new(config(dir.path()), relay.clone());

    let summary = signer.resume().await.unwrap();

    assert_eq!(summary, ResumeSummary::default());
    assert!(relay.calls().is_empty());
}

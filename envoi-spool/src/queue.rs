//! The queue document and the message files it refers to.
//!
//! `save` writes every message body before the document, so a document on
//! disk never names a file that was not written. Both are written to a
//! `.tmp_` file and renamed into place. There is no locking between
//! processes; the last writer wins.

use std::{
    io,
    path::{Path, PathBuf},
};

use envoi_common::{ParsedMessage, internal};
use serde::{Deserialize, Serialize};
use tokio::{fs, io::AsyncWriteExt};

use crate::SpoolError;

/// Name of the queue document inside the configuration location.
pub const QUEUE_FILE: &str = "inflight.json";

/// One record of the queue document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Content hash of the message, naming `<hash>.eml`.
    pub hash: String,
    /// Recipients still pending, as an address list.
    pub recipients: String,
}

impl QueueEntry {
    #[must_use]
    pub fn new(message: &ParsedMessage) -> Self {
        Self {
            hash: message.hash(),
            recipients: message.recipients(),
        }
    }

    fn file_name(&self) -> Result<String, SpoolError> {
        let valid = self.hash.len() == 64
            && self
                .hash
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        if valid {
            Ok(format!("{}.eml", self.hash))
        } else {
            Err(SpoolError::InvalidEntry {
                hash: self.hash.clone(),
                reason: "not a SHA-256 hex digest".to_string(),
            })
        }
    }

    /// Reopen the message file and restore the pending recipients.
    async fn restore(&self, location: &Path) -> Result<ParsedMessage, SpoolError> {
        let path = location.join(self.file_name()?);
        let bytes = fs::read(&path)
            .await
            .map_err(|err| SpoolError::io(&path, err))?;

        let mut message = ParsedMessage::parse(bytes)?;
        if message.hash() != self.hash {
            return Err(SpoolError::InvalidEntry {
                hash: self.hash.clone(),
                reason: format!("content of {} has changed", path.display()),
            });
        }

        // The headers name the original recipients, not the pending ones
        message.set_recipients(&self.recipients)?;
        Ok(message)
    }
}

/// Messages awaiting another attempt, in the order they were queued.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    messages: Vec<ParsedMessage>,
    location: PathBuf,
}

impl MessageQueue {
    /// An empty queue stored in `location`.
    #[must_use]
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            messages: Vec::new(),
            location: location.into(),
        }
    }

    /// Read the queue stored in `location`.
    ///
    /// A missing document is an empty queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the document or a message file cannot be read,
    /// or an entry is invalid.
    #[tracing::instrument(level = "debug", skip_all, fields(location = %location.as_ref().display()))]
    pub async fn load(location: impl AsRef<Path>) -> Result<Self, SpoolError> {
        let location = location.as_ref();
        let path = location.join(QUEUE_FILE);

        let document = match fs::read(&path).await {
            Ok(document) => document,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                internal!(level = DEBUG, "No queue at {}", path.display());
                return Ok(Self::new(location));
            }
            Err(err) => return Err(SpoolError::io(path, err)),
        };

        let entries: Vec<QueueEntry> = serde_json::from_slice(&document)?;
        let mut messages = Vec::with_capacity(entries.len());
        for entry in &entries {
            messages.push(entry.restore(location).await?);
        }

        internal!(level = DEBUG, "Loaded {} queued message(s)", messages.len());
        Ok(Self {
            messages,
            location: location.to_path_buf(),
        })
    }

    /// Write every message file, then the document listing them.
    ///
    /// Saving an empty queue removes the document instead.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    #[tracing::instrument(level = "debug", skip_all, fields(location = %self.location.display()))]
    pub async fn save(&self) -> Result<(), SpoolError> {
        if self.messages.is_empty() {
            return unlink(&self.location.join(QUEUE_FILE)).await;
        }

        for message in &self.messages {
            write_private(&self.location, &message.file_name(), message.bytes()).await?;
        }

        let entries: Vec<QueueEntry> = self.messages.iter().map(QueueEntry::new).collect();
        let document = serde_json::to_vec_pretty(&entries)?;
        write_private(&self.location, QUEUE_FILE, &document).await?;

        internal!(level = INFO, "Queued {} message(s)", entries.len());
        Ok(())
    }

    /// Append a message to the end of the queue.
    pub fn push(&mut self, message: ParsedMessage) {
        self.messages.push(message);
    }

    /// Remove the stored file of a message that no longer needs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn unlink(&self, message: &ParsedMessage) -> Result<(), SpoolError> {
        unlink(&self.location.join(message.file_name())).await
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParsedMessage> {
        self.messages.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }
}

impl IntoIterator for MessageQueue {
    type Item = ParsedMessage;
    type IntoIter = std::vec::IntoIter<ParsedMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageQueue {
    type Item = &'a ParsedMessage;
    type IntoIter = std::slice::Iter<'a, ParsedMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// Remove a file, treating one that is already gone as removed.
async fn unlink(path: &Path) -> Result<(), SpoolError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SpoolError::io(path, err)),
    }
}

/// Write a file readable only by its owner, replacing any existing one.
async fn write_private(dir: &Path, name: &str, contents: &[u8]) -> Result<(), SpoolError> {
    let path = dir.join(name);
    let temp = dir.join(format!(".tmp_{name}"));

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(&temp)
        .await
        .map_err(|err| SpoolError::io(&temp, err))?;
    file.write_all(contents)
        .await
        .map_err(|err| SpoolError::io(&temp, err))?;
    file.sync_all()
        .await
        .map_err(|err| SpoolError::io(&temp, err))?;
    drop(file);

    // A leftover temp file keeps the mode it was created with
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(|err| SpoolError::io(&temp, err))?;
    }

    fs::rename(&temp, &path)
        .await
        .map_err(|err| SpoolError::io(&path, err))
}

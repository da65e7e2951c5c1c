//! The message model: sender, recipients grouped by destination domain, and
//! a content identity derived from the body.

use std::{
    collections::{BTreeMap, BTreeSet},
    ops::Range,
};

use mailparse::MailHeaderMap;
use sha2::{Digest, Sha256};

use crate::{
    address::{Address, AddressList},
    error::ParseError,
};

/// Headers whose addresses make up the default recipient set, in the order
/// they are collected.
const RECIPIENT_HEADERS: [&str; 3] = ["To", "Cc", "Bcc"];

/// One header field in the raw message, including any continuation lines
/// and the trailing line ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    /// Field name as written (not case-folded).
    pub name: String,
    /// Byte range of the whole field within the message.
    pub range: Range<usize>,
}

impl HeaderField {
    /// Case-insensitive name comparison.
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Scan the header block of `raw` into fields.
///
/// Scanning stops at the first blank line. Any line that begins with a space
/// or tab belongs to the field before it.
#[must_use]
pub fn header_fields(raw: &[u8]) -> Vec<HeaderField> {
    let mut fields = Vec::new();
    let mut pos = 0;

    while pos < raw.len() {
        let line_end = next_line(raw, pos);
        let line = &raw[pos..line_end];
        if line == b"\r\n" || line == b"\n" {
            break;
        }

        let mut end = line_end;
        while end < raw.len() && matches!(raw[end], b' ' | b'\t') {
            end = next_line(raw, end);
        }

        let name_end = line.iter().position(|&b| b == b':').unwrap_or(line.len());
        let name = String::from_utf8_lossy(&line[..name_end]).trim().to_string();

        fields.push(HeaderField {
            name,
            range: pos..end,
        });
        pos = end;
    }

    fields
}

/// Index just past the next `\n` at or after `from`, or the end of `raw`.
fn next_line(raw: &[u8], from: usize) -> usize {
    raw[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(raw.len(), |i| from + i + 1)
}

/// A semi-structured email message.
///
/// Owns the raw bytes for the duration of a delivery attempt. Transforms
/// replace the bytes through [`ParsedMessage::replace_bytes`], which keeps
/// the sender and the pending recipient set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    sender: Address,
    bytes: Vec<u8>,
    body_offset: usize,
    recipients: BTreeMap<String, BTreeSet<String>>,
}

impl ParsedMessage {
    /// Parse raw message bytes to learn the sender and intended recipients.
    ///
    /// Recipients are collected from every `To`, then `Cc`, then `Bcc`
    /// header.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if the header block is malformed, `From` is
    /// missing or unparseable, or any recipient header holds an invalid
    /// address list.
    pub fn parse(bytes: Vec<u8>) -> Result<Self, ParseError> {
        let (sender, recipients, body_offset) = {
            let (headers, body_offset) = mailparse::parse_headers(&bytes)?;

            let from = headers
                .get_first_header("From")
                .ok_or(ParseError::MissingFrom)?;
            let sender = AddressList::from_header(from)?
                .0
                .into_iter()
                .next()
                .ok_or(ParseError::MissingFrom)?;

            let mut recipients = Vec::new();
            for name in RECIPIENT_HEADERS {
                for header in headers.get_all_headers(name) {
                    recipients.extend(AddressList::from_header(header)?);
                }
            }

            (sender, recipients, body_offset)
        };

        let mut message = Self {
            sender,
            bytes,
            body_offset,
            recipients: BTreeMap::new(),
        };
        message.assign_recipients(recipients);
        Ok(message)
    }

    /// The envelope sender as `local@domain`.
    #[must_use]
    pub fn sender(&self) -> String {
        self.sender.to_string()
    }

    /// The domain of the sender, used to pick the sending configuration.
    #[must_use]
    pub fn source_domain(&self) -> &str {
        &self.sender.domain
    }

    /// Use an explicit envelope sender instead of the one in `From`.
    ///
    /// # Errors
    ///
    /// Returns an error if `sender` is not a single valid address.
    pub fn set_sender(&mut self, sender: &str) -> Result<(), ParseError> {
        self.sender = Address::parse(sender)?;
        Ok(())
    }

    /// The full message as it will be transmitted.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Give up ownership of the message bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The header block, up to but excluding the separating blank line.
    #[must_use]
    pub fn header_block(&self) -> &[u8] {
        let end = header_fields(&self.bytes)
            .last()
            .map_or(0, |field| field.range.end);
        &self.bytes[..end]
    }

    /// The body, starting just after the separating blank line.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.bytes[self.body_offset.min(self.bytes.len())..]
    }

    /// Every header field in order of appearance.
    #[must_use]
    pub fn header_fields(&self) -> Vec<HeaderField> {
        header_fields(&self.bytes)
    }

    /// Swap in transformed bytes, re-reading the header block so the body
    /// offset stays accurate. Sender and recipients are unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the new header block cannot be parsed.
    pub fn replace_bytes(&mut self, bytes: Vec<u8>) -> Result<(), ParseError> {
        let (_, body_offset) = mailparse::parse_headers(&bytes)?;
        self.body_offset = body_offset;
        self.bytes = bytes;
        Ok(())
    }

    /// A stable handle for the message: the hex SHA-256 digest of the body.
    ///
    /// Headers are excluded so that sanitizing and signing do not change the
    /// identity of a message.
    #[must_use]
    pub fn hash(&self) -> String {
        hex::encode(Sha256::digest(self.body()))
    }

    /// File name the message content is stored under in the queue directory.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.eml", self.hash())
    }

    /// Replace the pending recipients with those in an address list.
    ///
    /// # Errors
    ///
    /// Returns an error if `recipients` is not a valid address list. The
    /// current recipients are kept in that case.
    pub fn set_recipients(&mut self, recipients: &str) -> Result<(), ParseError> {
        let list = AddressList::parse(recipients)?;
        self.assign_recipients(list);
        Ok(())
    }

    /// Remove every address in `other` from the pending recipients.
    ///
    /// Domains left without recipients are dropped. Removing addresses that
    /// are not pending is a no-op, so this is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if `other` is not a valid address list.
    pub fn remove_recipients(&mut self, other: &str) -> Result<(), ParseError> {
        let removed: BTreeSet<String> = AddressList::parse(other)?
            .iter()
            .map(ToString::to_string)
            .collect();

        self.recipients.retain(|_, addrs| {
            addrs.retain(|addr| !removed.contains(addr));
            !addrs.is_empty()
        });
        Ok(())
    }

    /// All pending recipients as a comma-separated address list, sorted by
    /// domain and then by address.
    #[must_use]
    pub fn recipients(&self) -> String {
        self.recipients
            .values()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// All pending recipients as a set.
    #[must_use]
    pub fn recipient_set(&self) -> BTreeSet<String> {
        self.recipients.values().flatten().cloned().collect()
    }

    /// Pending recipients at a single destination domain.
    #[must_use]
    pub fn recipients_for(&self, domain: &str) -> Option<&BTreeSet<String>> {
        self.recipients.get(domain)
    }

    /// Domains that still have at least one pending recipient.
    pub fn destination_domains(&self) -> impl Iterator<Item = &str> {
        self.recipients.keys().map(String::as_str)
    }

    /// Returns `true` while any recipient is pending.
    #[must_use]
    pub fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }

    fn assign_recipients(&mut self, list: impl IntoIterator<Item = Address>) {
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for addr in list {
            map.entry(addr.domain.clone())
                .or_default()
                .insert(addr.to_string());
        }
        self.recipients = map;
    }
}

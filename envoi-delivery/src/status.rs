//! The line-oriented status protocol spoken by a delivery step.
//!
//! A delivery step reports on its output, one line each:
//!
//! ```text
//! Info: <progress>
//! Delivered: <address list>
//! Fatal: <reason>
//! ```
//!
//! The caller reads the output back to learn which recipients are done.

use std::fmt;

use envoi_common::{ParsedMessage, internal};

const INFO: &str = "Info:";
const DELIVERED: &str = "Delivered:";
const FATAL: &str = "Fatal:";

/// One status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    Info(String),
    /// Comma-separated recipients the server accepted.
    Delivered(String),
    Fatal(String),
}

impl StatusLine {
    /// Recognise a status line. Anything else is `None`.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(rest) = line.strip_prefix(INFO) {
            Some(Self::Info(rest.trim().to_string()))
        } else if let Some(rest) = line.strip_prefix(DELIVERED) {
            Some(Self::Delivered(rest.trim().to_string()))
        } else {
            line.strip_prefix(FATAL)
                .map(|rest| Self::Fatal(rest.trim().to_string()))
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info(text) => write!(f, "{INFO} {text}"),
            Self::Delivered(list) => write!(f, "{DELIVERED} {list}"),
            Self::Fatal(text) => write!(f, "{FATAL} {text}"),
        }
    }
}

/// What reading a status stream found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interpretation {
    /// The reason given by a `Fatal` line, which ends the stream.
    pub fatal: Option<String>,
    /// Number of `Delivered` lines applied to the message.
    pub delivered: usize,
}

/// Apply the status lines in `output` to `message`.
///
/// `Delivered` lines remove their recipients from the pending set; a
/// `Fatal` line stops reading. `Info` lines and anything unrecognised,
/// including a `Delivered` line whose list does not parse, are skipped.
pub fn interpret(output: &str, message: &mut ParsedMessage) -> Interpretation {
    let mut result = Interpretation::default();

    for line in output.lines() {
        match StatusLine::parse(line) {
            Some(StatusLine::Fatal(reason)) => {
                internal!(level = WARN, "Delivery failed: {reason}");
                result.fatal = Some(reason);
                break;
            }
            Some(StatusLine::Delivered(list)) => match message.remove_recipients(&list) {
                Ok(()) => result.delivered += 1,
                Err(err) => internal!(level = WARN, "Ignoring status line {line:?}: {err}"),
            },
            Some(StatusLine::Info(text)) => internal!(level = DEBUG, "{text}"),
            None => {}
        }
    }

    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn message() -> ParsedMessage {
        ParsedMessage::parse(
            b"From: s@example.org\r\nTo: a@b.com, c@d.com\r\n\r\nbody\r\n".to_vec(),
        )
        .unwrap()
    }

    #[test]
    fn test_delivered_removes_recipients() {
        let mut message = message();
        let result = interpret("Info: x\nDelivered: a@b.com\nInfo: y", &mut message);

        assert_eq!(message.recipients(), "c@d.com");
        assert_eq!(result.delivered, 1);
        assert_eq!(result.fatal, None);
    }

    #[test]
    fn test_fatal_stops_reading() {
        let mut message = message();
        let result = interpret(
            "Fatal: no route\r\nDelivered: a@b.com, c@d.com\r\n",
            &mut message,
        );

        assert_eq!(result.fatal.as_deref(), Some("no route"));
        assert_eq!(message.recipients(), "a@b.com, c@d.com");
    }

    #[test]
    fn test_unrecognised_lines_are_skipped() {
        let mut message = message();
        let result = interpret(
            "warning: something\nDelivered: not an address\nDelivered: c@d.com\n",
            &mut message,
        );

        assert_eq!(result.delivered, 1);
        assert_eq!(message.recipients(), "a@b.com");
    }

    #[test]
    fn test_delivered_twice_is_harmless() {
        let mut message = message();
        interpret("Delivered: a@b.com\nDelivered: a@b.com\n", &mut message);
        assert_eq!(message.recipients(), "c@d.com");
    }

    #[test]
    fn test_display_round_trip() {
        let line = StatusLine::Delivered("a@b.com, c@d.com".to_string());
        assert_eq!(line.to_string(), "Delivered: a@b.com, c@d.com");
        assert_eq!(StatusLine::parse(&line.to_string()), Some(line));
    }
}

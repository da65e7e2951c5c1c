//! Strip headers that reveal when and where a message was written, and
//! replace them with values derived from the message itself.

use chrono::{DateTime, Utc};
use envoi_common::{ParsedMessage, message::header_fields};

use super::canon::to_crlf;
use crate::DeliveryError;

/// Headers removed before the replacements are added.
const REMOVED_HEADERS: [&str; 3] = ["Date", "Message-ID", "Bcc"];

/// Width of the window the Date header is rounded down to.
const DATE_GRANULARITY_SECS: i64 = 15 * 60;

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// The Date header value for `now`: rounded down to the quarter hour, in UTC.
///
/// # Errors
///
/// Returns an error if the rounded time is out of range.
pub fn quantized_date(now: DateTime<Utc>) -> Result<String, DeliveryError> {
    let secs = now.timestamp();
    let rounded = DateTime::<Utc>::from_timestamp(secs - secs.rem_euclid(DATE_GRANULARITY_SECS), 0)
        .ok_or_else(|| DeliveryError::Sanitize(format!("timestamp {secs} out of range")))?;
    Ok(rounded.format("%a, %d %b %Y %H:%M:%S %z").to_string())
}

/// Sanitize a message in place using the current time.
///
/// # Errors
///
/// Returns [`DeliveryError::Sanitize`] if the message has no blank line
/// separating headers from the body.
pub fn sanitize(message: &mut ParsedMessage) -> Result<(), DeliveryError> {
    sanitize_at(message, Utc::now())
}

/// Sanitize a message in place as if it were `now`.
///
/// Line endings become CRLF, `Date`, `Message-ID` and `Bcc` are removed,
/// then `Message-ID: <hash@source-domain>` and a quarter-hour `Date` are
/// prepended. The result depends only on the body, the sender's domain and
/// the quarter hour, so sanitizing the same content again is stable.
///
/// # Errors
///
/// Returns [`DeliveryError::Sanitize`] if the message has no blank line
/// separating headers from the body.
pub fn sanitize_at(message: &mut ParsedMessage, now: DateTime<Utc>) -> Result<(), DeliveryError> {
    let mut bytes = message.bytes().to_vec();
    if !contains(&bytes, b"\r\n\r\n") {
        bytes = to_crlf(&bytes);
    }
    if !contains(&bytes, b"\r\n\r\n") {
        return Err(DeliveryError::Sanitize(
            "couldn't locate end of headers".to_string(),
        ));
    }

    let fields = header_fields(&bytes);
    let header_end = fields.last().map_or(0, |field| field.range.end);

    let mut stripped = Vec::with_capacity(bytes.len());
    for field in &fields {
        if !REMOVED_HEADERS.iter().any(|name| field.is(name)) {
            stripped.extend_from_slice(&bytes[field.range.clone()]);
        }
    }
    stripped.extend_from_slice(&bytes[header_end..]);

    message.replace_bytes(stripped)?;

    let mut sanitized = format!(
        "Message-ID: <{}@{}>\r\nDate: {}\r\n",
        message.hash(),
        message.source_domain(),
        quantized_date(now)?
    )
    .into_bytes();
    sanitized.extend_from_slice(message.bytes());

    message.replace_bytes(sanitized)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    const RAW: &[u8] = b"From: Alice <alice@example.org>\n\
        To: bob@example.com\n\
        Bcc: secret@example.net\n\
        Date: Tue, 1 Oct 2024 10:03:17 +0200\n\
        Message-ID:\n <local.123@laptop.lan>\n\
        Subject: Hi\n\
        \n\
        Hello Bob\n";

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, h, m, s).unwrap()
    }

    fn sanitized(now: DateTime<Utc>) -> ParsedMessage {
        let mut message = ParsedMessage::parse(RAW.to_vec()).unwrap();
        sanitize_at(&mut message, now).unwrap();
        message
    }

    #[test]
    fn test_quantized_date() {
        assert_eq!(
            quantized_date(at(10, 14, 59)).unwrap(),
            "Tue, 01 Oct 2024 10:00:00 +0000"
        );
        assert_eq!(
            quantized_date(at(10, 15, 0)).unwrap(),
            "Tue, 01 Oct 2024 10:15:00 +0000"
        );
    }

    #[test]
    fn test_removes_identifying_headers() {
        let message = sanitized(at(10, 3, 17));
        let text = String::from_utf8(message.bytes().to_vec()).unwrap();

        assert!(!text.contains("laptop.lan"));
        assert!(!text.contains("secret@example.net"));
        assert!(!text.contains("+0200"));
        assert!(text.contains("\r\nSubject: Hi\r\n\r\nHello Bob\r\n"));
        assert!(text.starts_with(&format!(
            "Message-ID: <{}@example.org>\r\nDate: Tue, 01 Oct 2024 10:00:00 +0000\r\nFrom:",
            message.hash()
        )));
    }

    #[test]
    fn test_same_content_same_headers() {
        let first = sanitized(at(10, 1, 0));
        let second = sanitized(at(10, 14, 0));
        assert_eq!(first.bytes(), second.bytes());
    }

    #[test]
    fn test_resanitizing_is_stable() {
        let mut message = sanitized(at(10, 1, 0));
        let once = message.bytes().to_vec();
        sanitize_at(&mut message, at(10, 2, 0)).unwrap();
        assert_eq!(message.bytes(), once.as_slice());
    }

    #[test]
    fn test_keeps_recipients() {
        let message = sanitized(at(10, 1, 0));
        assert!(message.recipient_set().contains("secret@example.net"));
        assert_eq!(message.destination_domains().count(), 2);
    }

    #[test]
    fn test_missing_separator() {
        let mut message =
            ParsedMessage::parse(b"From: a@example.org\r\nTo: b@example.com\r\n".to_vec()).unwrap();
        assert!(matches!(
            sanitize_at(&mut message, at(10, 0, 0)),
            Err(DeliveryError::Sanitize(_))
        ));
    }
}

//! Error types for the envoi-spool crate.

use std::{io, path::PathBuf};

use envoi_common::ParseError;
use thiserror::Error;

/// Errors raised while reading or writing the queue.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// A queue file could not be read, written or removed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The queue document is not a valid JSON array of entries.
    #[error("Invalid queue document: {0}")]
    Json(#[from] serde_json::Error),

    /// An entry names a file that cannot be a message hash, or whose
    /// content no longer matches it.
    #[error("Invalid queue entry {hash}: {reason}")]
    InvalidEntry { hash: String, reason: String },

    /// A queued message or its recipient list could not be parsed.
    #[error("Invalid queued message: {0}")]
    Parse(#[from] ParseError),
}

impl SpoolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_names_path() {
        let err = SpoolError::io(
            "/var/lib/envoi/inflight.json",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(
            err.to_string(),
            "I/O error on /var/lib/envoi/inflight.json: denied"
        );
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: SpoolError = ParseError::MissingFrom.into();
        assert!(matches!(err, SpoolError::Parse(ParseError::MissingFrom)));
    }
}

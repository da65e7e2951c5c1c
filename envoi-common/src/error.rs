//! Error types for the envoi-common crate.
//!
//! These are the foundational errors shared by every other crate in the
//! workspace: message parsing, configuration and external commands.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Errors raised while parsing a message or an address list.
///
/// A parse error is fatal to the whole operation: without a valid sender and
/// recipient set there is nothing to deliver.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The header block could not be parsed at all.
    #[error("Malformed message: {0}")]
    Malformed(#[from] mailparse::MailParseError),

    /// The message has no `From` header, or it holds no usable mailbox.
    #[error("Message has no usable From header")]
    MissingFrom,

    /// An address list header could not be parsed.
    #[error("Invalid address list in {header}: {reason}")]
    InvalidAddressList { header: String, reason: String },

    /// A single address has no `@` separating the local part and domain.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors raised while loading or querying the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is not valid RON for the expected layout.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// No configuration file was found in any of the searched locations.
    #[error("No configuration file found. Tried:\n{0}")]
    NotFound(String),

    /// An alias points at a domain that does not exist, or at another alias.
    #[error("Domain {domain} is an alias of {target}, which is {reason}")]
    InvalidAlias {
        domain: String,
        target: String,
        reason: &'static str,
    },

    /// There is no configuration for the given sending domain.
    #[error("No configuration for sender {0}")]
    NoConfiguration(String),
}

/// Errors raised while running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command string was empty after splitting on whitespace.
    #[error("Empty command")]
    Empty,

    /// The process could not be spawned or waited on.
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The process ran but exited unsuccessfully.
    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::InvalidAddressList {
            header: "To".to_string(),
            reason: "unexpected <".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid address list in To: unexpected <");
    }

    #[test]
    fn test_command_error_display() {
        let err = CommandError::Failed {
            command: "false".to_string(),
            status: "exit status: 1".to_string(),
            output: String::new(),
        };
        assert!(err.to_string().starts_with("`false` exited with exit status: 1"));
    }
}

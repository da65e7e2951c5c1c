pub mod address;
pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;

pub use tracing;

pub use address::{Address, AddressList};
pub use command::{CommandOutput, CommandRunner, SystemCommand};
pub use config::{Config, DomainConfig, RelayConfig};
pub use error::{CommandError, ConfigError, ParseError};
pub use message::ParsedMessage;

/// Environment variable carrying a comma-separated recipient override.
pub const RECIPIENTS_ENV: &str = "ENVOI_RECIPIENTS";

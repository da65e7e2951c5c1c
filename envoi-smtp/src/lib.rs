pub mod client;
pub mod dial;
mod error;
pub mod socks;

pub use dial::{Connection, DialPlan, Dialer};
pub use error::DialError;

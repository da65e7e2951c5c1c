use std::{
    fmt::{self, Display},
    ops::Deref,
};

use mailparse::{MailAddr, MailAddrList, MailHeader, SingleInfo};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// A single mailbox, split into its local part and domain at the last `@`.
///
/// The domain is lower-cased so that recipients for `Example.COM` and
/// `example.com` share a destination.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub local_part: String,
    pub domain: String,
}

impl Address {
    /// Split an `addr-spec` at its last `@`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidAddress`] if there is no `@`, or either
    /// side of it is empty.
    pub fn from_addr_spec(spec: &str) -> Result<Self, ParseError> {
        let spec = spec.trim();
        let (local_part, domain) = spec
            .rsplit_once('@')
            .filter(|(local, domain)| !local.is_empty() && !domain.is_empty())
            .ok_or_else(|| ParseError::InvalidAddress(spec.to_string()))?;

        Ok(Self {
            local_part: local_part.to_string(),
            domain: domain.to_ascii_lowercase(),
        })
    }

    /// Parse a header value that must hold exactly one usable mailbox, such
    /// as an explicit envelope sender.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an address list, or is empty.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        AddressList::parse(value)?
            .0
            .into_iter()
            .next()
            .ok_or_else(|| ParseError::InvalidAddress(value.to_string()))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl TryFrom<&SingleInfo> for Address {
    type Error = ParseError;

    fn try_from(value: &SingleInfo) -> Result<Self, Self::Error> {
        Self::from_addr_spec(&value.addr)
    }
}

/// A flattened list of mailboxes. Groups are expanded into their members.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressList(pub Vec<Address>);

impl AddressList {
    /// Parse an RFC 5322 address list such as
    /// `"Tom" <tom@example.com>, jane@example.org`.
    ///
    /// A blank string is an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if the list is malformed or holds an address
    /// without a domain.
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }

        let list = mailparse::addrparse(value).map_err(|e| ParseError::InvalidAddressList {
            header: "address list".to_string(),
            reason: e.to_string(),
        })?;
        Self::flatten(&list)
    }

    /// Parse the value of an address header, decoding any encoded words.
    ///
    /// # Errors
    ///
    /// Returns an error naming the header if the list is malformed.
    pub fn from_header(header: &MailHeader<'_>) -> Result<Self, ParseError> {
        let list =
            mailparse::addrparse_header(header).map_err(|e| ParseError::InvalidAddressList {
                header: header.get_key(),
                reason: e.to_string(),
            })?;
        Self::flatten(&list)
    }

    fn flatten(list: &MailAddrList) -> Result<Self, ParseError> {
        let mut out = Vec::with_capacity(list.len());
        for addr in list.iter() {
            match addr {
                MailAddr::Single(info) => out.push(Address::try_from(info)?),
                MailAddr::Group(group) => {
                    for info in &group.addrs {
                        out.push(Address::try_from(info)?);
                    }
                }
            }
        }
        Ok(Self(out))
    }
}

impl Display for AddressList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, addr) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            Display::fmt(addr, f)?;
        }
        Ok(())
    }
}

impl Deref for AddressList {
    type Target = Vec<Address>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for AddressList {
    type Item = Address;
    type IntoIter = std::vec::IntoIter<Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

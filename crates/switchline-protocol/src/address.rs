//! Endpoint addresses.
//!
//! An address has the form `local@domain` where `local` is non-empty and
//! `domain` is non-empty and contains at least one `.`. Addresses are
//! validated on construction, before any protocol use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A validated `local@domain` endpoint identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

/// Errors produced by address validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The address has no `@` separator.
    #[error("address {0:?} is missing an '@' separator")]
    MissingSeparator(String),

    /// The local part (before `@`) is empty.
    #[error("address {0:?} has an empty local part")]
    EmptyLocal(String),

    /// The domain part (after `@`) is empty.
    #[error("address {0:?} has an empty domain")]
    EmptyDomain(String),

    /// The domain part has no `.`.
    #[error("address {0:?} has a domain without a '.'")]
    DomainWithoutDot(String),

    /// The address contains more than one `@`.
    #[error("address {0:?} contains more than one '@'")]
    ExtraSeparator(String),
}

impl Address {
    /// Parses and validates an address.
    ///
    /// # Errors
    ///
    /// Returns an [`AddressError`] describing the first rule the input
    /// violates.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let Some((local, domain)) = input.split_once('@') else {
            return Err(AddressError::MissingSeparator(input.to_string()));
        };
        if local.is_empty() {
            return Err(AddressError::EmptyLocal(input.to_string()));
        }
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain(input.to_string()));
        }
        if domain.contains('@') {
            return Err(AddressError::ExtraSeparator(input.to_string()));
        }
        if !domain.contains('.') {
            return Err(AddressError::DomainWithoutDot(input.to_string()));
        }
        Ok(Self(input.to_string()))
    }

    /// Returns the local part (before `@`).
    #[must_use]
    pub fn local(&self) -> &str {
        self.0.split_once('@').map(|(local, _)| local).unwrap_or("")
    }

    /// Returns the domain part (after `@`).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0
            .split_once('@')
            .map(|(_, domain)| domain)
            .unwrap_or("")
    }

    /// Returns the full address string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl PartialEq<str> for Address {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

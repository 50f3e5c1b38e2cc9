// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Linux network interface names

use std::fmt::{Display, Formatter};

/// A string which has been checked to be a legal linux network interface name: alphanumeric
/// ASCII characters, `.`, `-` and `_`, at most 15 bytes (the kernel's 16 include the NUL).
#[repr(transparent)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct InterfaceName(String);

impl InterfaceName {
    pub const MAX_LEN: usize = 15;
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors which may occur when mapping a general `String` into an `InterfaceName`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, thiserror::Error)]
pub enum IllegalInterfaceName {
    #[error("interface name must be at least one character")]
    Empty,
    #[error("name must not be . or ..")]
    MustNotIncludeOnlyDots(String),
    #[error("interface name {0} is too long")]
    TooLong(String),
    #[error(
        "interface name {0} contains illegal characters (only alphanumeric ASCII and .-_ are permitted)"
    )]
    IllegalCharacters(String),
}

impl TryFrom<String> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        const LEGAL_PUNCT: [char; 3] = ['.', '-', '_'];
        if value.is_empty() {
            return Err(IllegalInterfaceName::Empty);
        }
        if value == "." || value == ".." {
            return Err(IllegalInterfaceName::MustNotIncludeOnlyDots(value));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || LEGAL_PUNCT.contains(&c))
        {
            return Err(IllegalInterfaceName::IllegalCharacters(value));
        }
        if value.len() > InterfaceName::MAX_LEN {
            return Err(IllegalInterfaceName::TooLong(value));
        }
        Ok(InterfaceName(value))
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = IllegalInterfaceName;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl AsRef<str> for InterfaceName {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::{IllegalInterfaceName, InterfaceName};

    #[test]
    fn interface_name_limits() {
        assert!(InterfaceName::try_from("vwlan0.0000").is_ok());
        assert!(InterfaceName::try_from("v0123456789.99").is_ok());
        assert_eq!(
            InterfaceName::try_from("v0123456789.9999"),
            Err(IllegalInterfaceName::TooLong("v0123456789.9999".to_string()))
        );
        assert!(matches!(
            InterfaceName::try_from("br lan"),
            Err(IllegalInterfaceName::IllegalCharacters(_))
        ));
        assert_eq!(InterfaceName::try_from(""), Err(IllegalInterfaceName::Empty));
        assert!(InterfaceName::try_from("..").is_err());
    }
}

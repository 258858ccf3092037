//! Content addresses: a 64-hex xorname optionally followed by `/`-separated path segments.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of the hex xorname prefix.
pub const XORNAME_HEX_LEN: usize = 64;

/// Validated content address. Construct with [`Address::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse `input` against `HEX64 ("/" SEGMENT)*`. Rejects any `..` anywhere in the string.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        if input.contains("..") {
            return Err(AddressError::Traversal);
        }
        let bytes = input.as_bytes();
        if bytes.len() < XORNAME_HEX_LEN {
            return Err(AddressError::TooShort(bytes.len()));
        }
        if let Some(pos) = bytes[..XORNAME_HEX_LEN]
            .iter()
            .position(|b| !b.is_ascii_hexdigit())
        {
            return Err(AddressError::NotHex(pos));
        }
        let rest = &input[XORNAME_HEX_LEN..];
        if rest.is_empty() {
            return Ok(Address(input.to_string()));
        }
        let Some(path) = rest.strip_prefix('/') else {
            return Err(AddressError::TrailingGarbage);
        };
        for segment in path.split('/') {
            if segment.is_empty() {
                return Err(AddressError::EmptySegment);
            }
            if let Some(c) = segment.chars().find(|&c| !is_segment_char(c)) {
                return Err(AddressError::BadSegmentChar(c));
            }
        }
        Ok(Address(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '_' | '-' | '.' | '~' | ':' | '@' | '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+'
                | ',' | ';' | '='
        )
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(a: Address) -> String {
        a.0
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Why an address was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address too short: {0} chars, need at least 64")]
    TooShort(usize),
    #[error("non-hex character at position {0}")]
    NotHex(usize),
    #[error("expected '/' after the 64-hex xorname")]
    TrailingGarbage,
    #[error("empty path segment")]
    EmptySegment,
    #[error("invalid path character {0:?}")]
    BadSegmentChar(char),
    #[error("path traversal is not allowed")]
    Traversal,
}

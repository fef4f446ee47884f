// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use crate::error::StickError;

/// 16-character uppercase-hex hardware address of a node or the stick.
///
/// Stored as validated ASCII so it can be written to the wire without
/// re-encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mac([u8; 16]);

impl Mac {
    /// Parse a host-supplied MAC. Anything other than exactly 16
    /// uppercase hex characters is rejected with `InvalidMac`.
    pub fn parse(input: &str) -> Result<Self, StickError> {
        let bytes = input.as_bytes();
        if bytes.len() != 16 || !bytes.iter().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b)) {
            return Err(StickError::InvalidMac { input: input.to_owned() });
        }
        let mut mac = [0u8; 16];
        mac.copy_from_slice(bytes);
        Ok(Self(mac))
    }

    /// Parse a MAC field out of a wire frame body.
    pub(crate) fn from_wire(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 16 || !bytes.iter().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(b)) {
            return None;
        }
        let mut mac = [0u8; 16];
        mac.copy_from_slice(bytes);
        Some(Self(mac))
    }

    /// The coordinator answers on the stick-reported Circle+ MAC with its
    /// first two characters replaced by `"00"`.
    pub fn as_coordinator(&self) -> Self {
        let mut mac = self.0;
        mac[0] = b'0';
        mac[1] = b'0';
        Self(mac)
    }

    pub fn as_str(&self) -> &str {
        // Contents are validated ASCII at construction.
        std::str::from_utf8(&self.0).unwrap_or("")
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mac({})", self.as_str())
    }
}

impl std::str::FromStr for Mac {
    type Err = StickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[path = "mac_tests.rs"]
mod mac_tests;

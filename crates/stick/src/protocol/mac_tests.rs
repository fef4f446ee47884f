// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn parse_accepts_uppercase_hex() -> anyhow::Result<()> {
    let mac = Mac::parse("000D6F0001234567")?;
    assert_eq!(mac.as_str(), "000D6F0001234567");
    Ok(())
}

#[test]
fn parse_rejects_lowercase() {
    assert!(Mac::parse("000d6f0001234567").is_err());
}

#[test]
fn parse_rejects_wrong_length() {
    assert!(Mac::parse("000D6F00").is_err());
    assert!(Mac::parse("000D6F000123456789").is_err());
    assert!(Mac::parse("").is_err());
}

#[test]
fn parse_rejects_non_hex() {
    assert!(Mac::parse("000G6F0001234567").is_err());
    assert!(Mac::parse("000D6F00012345-7").is_err());
}

#[test]
fn coordinator_mac_zeroes_first_two_characters() -> anyhow::Result<()> {
    let reported = Mac::parse("230D6F00AABBCCDD")?;
    assert_eq!(reported.as_coordinator().as_str(), "000D6F00AABBCCDD");

    let reported = Mac::parse("0123456789ABCDEF")?;
    assert_eq!(reported.as_coordinator().as_str(), "0023456789ABCDEF");
    Ok(())
}

#[test]
fn display_matches_as_str() -> anyhow::Result<()> {
    let mac = Mac::parse("0098765432ABCDEF")?;
    assert_eq!(format!("{mac}"), "0098765432ABCDEF");
    Ok(())
}

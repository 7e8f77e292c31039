//! Text codecs for persisting addresses and 256-bit integers.
//!
//! Addresses and token ids are stored as lowercase 0x-hex text; ERC-1155
//! quantities are stored as `NUMERIC` and travel as decimal strings.

use alloy::primitives::{Address, U256};
use anyhow::{Context, Result};
use std::str::FromStr;

/// Lowercase 0x-prefixed hex, the normalized on-disk address form.
pub fn address_to_text(address: &Address) -> String {
    format!("{address:#x}")
}

pub fn address_from_text(s: &str) -> Result<Address> {
    Address::from_str(s.trim()).with_context(|| format!("invalid address text: {s:?}"))
}

/// Minimal 0x-hex (no zero padding), the on-disk token id form.
pub fn u256_to_hex(value: &U256) -> String {
    format!("{value:#x}")
}

pub fn u256_from_hex(s: &str) -> Result<U256> {
    let digits = s.trim().trim_start_matches("0x");
    U256::from_str_radix(digits, 16).with_context(|| format!("invalid hex u256: {s:?}"))
}

/// Decimal form used for `NUMERIC` columns.
pub fn u256_to_decimal(value: &U256) -> String {
    value.to_string()
}

pub fn u256_from_decimal(s: &str) -> Result<U256> {
    U256::from_str_radix(s.trim(), 10).with_context(|| format!("invalid decimal u256: {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let address = Address::from_str("0xAbCd000000000000000000000000000000001234").unwrap();
        let text = address_to_text(&address);
        assert_eq!(text, "0xabcd000000000000000000000000000000001234");
        assert_eq!(address_from_text(&text).unwrap(), address);
    }

    #[test]
    fn test_u256_hex_round_trip() {
        let value = U256::from(0x2au64);
        assert_eq!(u256_to_hex(&value), "0x2a");
        assert_eq!(u256_from_hex("0x2a").unwrap(), value);
        assert_eq!(u256_from_hex("2a").unwrap(), value);
    }

    #[test]
    fn test_u256_decimal_round_trip() {
        let value = U256::from(1_000_000u64);
        assert_eq!(u256_to_decimal(&value), "1000000");
        assert_eq!(u256_from_decimal("1000000").unwrap(), value);
    }
}

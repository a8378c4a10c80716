//! Account addresses.
//!
//! An address is a 32-byte public key rendered in the ledger's base-32
//! alphabet with a 5-byte blake2b checksum. The protocol also abuses this
//! encoding to smuggle arbitrary 32-byte payloads through the block
//! `representative` field, so the raw bytes stay first-class here.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LedgerError;

const PREFIX: &str = "nano_";
const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

/// A base-ledger account address, stored as the underlying public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 32]);

impl Address {
    /// The all-zero public key, used as the ledger scan origin.
    pub fn zero() -> Self {
        Address([0u8; 32])
    }

    pub fn from_pubkey(pubkey: [u8; 32]) -> Self {
        Address(pubkey)
    }

    /// The raw public key (or payload) behind this address.
    pub fn as_pubkey(&self) -> &[u8; 32] {
        &self.0
    }
}

fn checksum(pubkey: &[u8; 32]) -> [u8; 5] {
    let hash = blake2b_simd::Params::new().hash_length(5).hash(pubkey);
    let mut sum = [0u8; 5];
    sum.copy_from_slice(hash.as_bytes());
    sum.reverse();
    sum
}

/// Encode `data` as base-32, left-padding the bit string with zeros so its
/// length is a multiple of five.
fn encode_b32(data: &[u8]) -> String {
    let pad = (5 - (data.len() * 8) % 5) % 5;
    let mut out = String::with_capacity((data.len() * 8 + pad) / 5);
    let mut acc: u32 = 0;
    let mut bits = pad;
    for &byte in data {
        acc = (acc << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[(acc >> bits) as usize & 31] as char);
            acc &= (1 << bits) - 1;
        }
    }
    out
}

/// Decode a base-32 string into exactly `len` bytes. The leading pad bits
/// must be zero.
fn decode_b32(text: &str, len: usize) -> Result<Vec<u8>, LedgerError> {
    let bad = || LedgerError::BadAddress(text.into());
    if text.len() * 5 < len * 8 || text.len() * 5 >= len * 8 + 5 {
        return Err(bad());
    }
    // leading pad bits that must be stripped (and zero) before the first byte
    let mut pad = text.len() * 5 - len * 8;
    let mut out = Vec::with_capacity(len);
    let mut acc: u32 = 0;
    let mut bits = 0;
    for ch in text.bytes() {
        let value = ALPHABET.iter().position(|&c| c == ch).ok_or_else(bad)? as u32;
        acc = (acc << 5) | value;
        bits += 5;
        if pad > 0 && bits >= pad {
            if acc >> (bits - pad) != 0 {
                return Err(bad());
            }
            bits -= pad;
            pad = 0;
        }
        while bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }
    Ok(out)
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 4 zero bits + 256 key bits => 52 chars, then 40 checksum bits => 8
        let mut body = [0u8; 33];
        body[1..].copy_from_slice(&self.0);
        write!(
            f,
            "{PREFIX}{}{}",
            &encode_b32(&body)[1..],
            encode_b32(&checksum(&self.0))
        )
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || LedgerError::BadAddress(s.into());
        let body = s
            .strip_prefix(PREFIX)
            .or_else(|| s.strip_prefix("xrb_"))
            .ok_or_else(bad)?;
        if body.len() != 60 {
            return Err(bad());
        }
        let key = decode_b32(&body[..52], 32)?;
        let sum = decode_b32(&body[52..], 5)?;
        let mut pubkey = [0u8; 32];
        pubkey.copy_from_slice(&key);
        if sum != checksum(&pubkey) {
            return Err(bad());
        }
        Ok(Address(pubkey))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_address_round_trips() {
        let zero = Address::zero();
        let text = zero.to_string();
        assert!(text.starts_with(PREFIX));
        assert_eq!(text.len(), PREFIX.len() + 60);
        assert_eq!(text.parse::<Address>().unwrap(), zero);
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let text = Address::from_pubkey([7u8; 32]).to_string();
        let mut broken = text.into_bytes();
        let last = broken.len() - 1;
        broken[last] = if broken[last] == b'1' { b'3' } else { b'1' };
        let broken = String::from_utf8(broken).unwrap();
        assert!(broken.parse::<Address>().is_err());
    }

    #[test]
    fn rejects_missing_prefix() {
        let text = Address::from_pubkey([7u8; 32]).to_string();
        assert!(text[PREFIX.len()..].parse::<Address>().is_err());
    }

    proptest! {
        #[test]
        fn encode_decode_is_identity(pubkey in any::<[u8; 32]>()) {
            let address = Address::from_pubkey(pubkey);
            let parsed: Address = address.to_string().parse().unwrap();
            prop_assert_eq!(parsed, address);
        }
    }
}

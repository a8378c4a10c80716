//! Wire types for the node's JSON action protocol.
//!
//! The node renders every number as a JSON string, so the amount and height
//! fields carry `serde(with = ...)` helpers.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::address::Address;
use crate::error::LedgerError;

/// A 32-byte block hash, uppercase hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    pub fn zero() -> Self {
        BlockHash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        BlockHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({self})")
    }
}

impl FromStr for BlockHash {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| LedgerError::BadHash(s.into()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LedgerError::BadHash(s.into()))?;
        Ok(BlockHash(bytes))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Block subtype as classified by the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subtype {
    Send,
    Receive,
    Change,
    Open,
    Epoch,
}

impl fmt::Display for Subtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subtype::Send => "send",
            Subtype::Receive => "receive",
            Subtype::Change => "change",
            Subtype::Open => "open",
            Subtype::Epoch => "epoch",
        };
        f.write_str(name)
    }
}

/// Serde helpers for the node's string-encoded integers.
pub mod string_encoded {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T: Display, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// Like [`string_encoded`] but tolerating an absent or empty field, mapped
/// to zero. `block_info` omits `amount` for change blocks.
pub mod string_encoded_opt {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T: Display, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr + Default,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(T::default()),
            Some(text) if text.is_empty() => Ok(T::default()),
            Some(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

/// The contents of a state block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub kind: String,
    pub account: Address,
    pub previous: BlockHash,
    pub representative: Address,
    #[serde(with = "string_encoded")]
    pub balance: u128,
    pub link: BlockHash,
    pub link_as_account: Address,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub work: String,
}

/// `block_info` response.
#[derive(Clone, Debug, Deserialize)]
pub struct BlockInfo {
    pub block_account: Address,
    #[serde(default, with = "string_encoded_opt")]
    pub amount: u128,
    #[serde(with = "string_encoded")]
    pub height: u64,
    pub subtype: Subtype,
    pub contents: Block,
}

/// `account_info` response.
#[derive(Clone, Debug, Deserialize)]
pub struct AccountInfo {
    pub frontier: BlockHash,
    pub open_block: BlockHash,
    pub representative: Address,
    #[serde(with = "string_encoded")]
    pub balance: u128,
    #[serde(with = "string_encoded")]
    pub block_count: u64,
}

/// One entry of a `ledger` enumeration.
#[derive(Clone, Debug, Deserialize)]
pub struct LedgerEntry {
    pub frontier: BlockHash,
    pub open_block: BlockHash,
    #[serde(with = "string_encoded")]
    pub balance: u128,
    #[serde(with = "string_encoded")]
    pub modified_timestamp: u64,
}

impl Block {
    /// The canonical block hash: blake2b-256 over the state preamble and the
    /// block fields in ledger order.
    pub fn hash(&self) -> BlockHash {
        let mut preamble = [0u8; 32];
        preamble[31] = 6;
        let mut state = blake2b_simd::Params::new().hash_length(32).to_state();
        state.update(&preamble);
        state.update(self.account.as_pubkey());
        state.update(self.previous.as_bytes());
        state.update(self.representative.as_pubkey());
        state.update(&self.balance.to_be_bytes());
        state.update(self.link.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(state.finalize().as_bytes());
        BlockHash(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        Block {
            kind: "state".into(),
            account: Address::from_pubkey([1u8; 32]),
            previous: BlockHash::zero(),
            representative: Address::from_pubkey([2u8; 32]),
            balance: 12345678901234567890,
            link: BlockHash::from_bytes([3u8; 32]),
            link_as_account: Address::from_pubkey([3u8; 32]),
            signature: String::new(),
            work: String::new(),
        }
    }

    #[test]
    fn block_hash_ignores_signature_and_work() {
        let block = sample_block();
        let mut signed = block.clone();
        signed.signature = "ff".repeat(64);
        signed.work = "0000000000000000".into();
        assert_eq!(block.hash(), signed.hash());
    }

    #[test]
    fn block_hash_depends_on_every_field() {
        let base = sample_block().hash();
        let mut other = sample_block();
        other.balance -= 1;
        assert_ne!(base, other.hash());
        let mut other = sample_block();
        other.representative = Address::from_pubkey([9u8; 32]);
        assert_ne!(base, other.hash());
    }

    #[test]
    fn block_json_round_trips() {
        let block = sample_block();
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"state\""));
        assert!(json.contains("\"balance\":\"12345678901234567890\""));
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn hash_parses_uppercase_and_lowercase() {
        let hash = BlockHash::from_bytes([0xab; 32]);
        let upper = hash.to_string();
        assert_eq!(upper, upper.to_uppercase());
        assert_eq!(upper.parse::<BlockHash>().unwrap(), hash);
        assert_eq!(upper.to_lowercase().parse::<BlockHash>().unwrap(), hash);
        assert!("zz".parse::<BlockHash>().is_err());
    }
}

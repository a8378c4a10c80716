//! Node RPC: the [`NodeClient`] seam and its HTTP implementation.
//!
//! The node speaks a JSON action protocol over POST: every request is an
//! object with an `action` field, every error is `{"error": "..."}` with a
//! 200 status.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::address::Address;
use crate::error::LedgerError;
use crate::types::{AccountInfo, Block, BlockHash, BlockInfo, LedgerEntry, Subtype};

/// Everything the replayer, wallet and discovery loop need from a node.
///
/// `ledger` enumerates accounts from `start` (inclusive) in address order,
/// restricted to accounts modified at or after `modified_since` (Unix
/// seconds). `successors` returns hashes from `start` inclusive toward the
/// head; `count` of `-1` means unlimited.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn account_info(&self, account: &Address) -> Result<AccountInfo, LedgerError>;

    async fn block_info(&self, hash: BlockHash) -> Result<BlockInfo, LedgerError>;

    async fn blocks(
        &self,
        hashes: &[BlockHash],
    ) -> Result<HashMap<BlockHash, Block>, LedgerError>;

    async fn successors(
        &self,
        start: BlockHash,
        count: i64,
    ) -> Result<Vec<BlockHash>, LedgerError>;

    async fn ledger(
        &self,
        start: &Address,
        count: u64,
        modified_since: u64,
    ) -> Result<BTreeMap<Address, LedgerEntry>, LedgerError>;

    /// Publish a signed block; returns its hash.
    async fn process(&self, subtype: Subtype, block: &Block) -> Result<BlockHash, LedgerError>;

    /// Solve work for `root` (an account public key or a frontier hash).
    async fn work_generate(&self, root: BlockHash) -> Result<String, LedgerError>;

    /// Hashes of send blocks waiting to be received by `account`.
    async fn receivable(
        &self,
        account: &Address,
        count: u64,
    ) -> Result<Vec<BlockHash>, LedgerError>;

    /// Confirmed and receivable balance.
    async fn account_balance(&self, account: &Address) -> Result<(u128, u128), LedgerError>;
}

/// HTTP implementation of [`NodeClient`].
pub struct RpcClient {
    url: String,
    client: reqwest::Client,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn call<T: DeserializeOwned>(&self, body: Value) -> Result<T, LedgerError> {
        let response = self.client.post(&self.url).json(&body).send().await?;
        let value: Value = response.json().await?;
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Err(LedgerError::from_node(message.to_string()));
        }
        serde_json::from_value(value).map_err(|e| LedgerError::BadResponse(e.to_string()))
    }
}

fn hashes_from(value: &Value) -> Vec<BlockHash> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[async_trait]
impl NodeClient for RpcClient {
    async fn account_info(&self, account: &Address) -> Result<AccountInfo, LedgerError> {
        self.call(json!({
            "action": "account_info",
            "account": account,
            "representative": "true",
        }))
        .await
    }

    async fn block_info(&self, hash: BlockHash) -> Result<BlockInfo, LedgerError> {
        self.call(json!({
            "action": "block_info",
            "json_block": "true",
            "hash": hash,
        }))
        .await
    }

    async fn blocks(
        &self,
        hashes: &[BlockHash],
    ) -> Result<HashMap<BlockHash, Block>, LedgerError> {
        let value: Value = self
            .call(json!({
                "action": "blocks",
                "json_block": "true",
                "hashes": hashes,
            }))
            .await?;
        match value.get("blocks") {
            Some(blocks) if blocks.is_object() => serde_json::from_value(blocks.clone())
                .map_err(|e| LedgerError::BadResponse(e.to_string())),
            _ => Ok(HashMap::new()),
        }
    }

    async fn successors(
        &self,
        start: BlockHash,
        count: i64,
    ) -> Result<Vec<BlockHash>, LedgerError> {
        let value: Value = self
            .call(json!({
                "action": "successors",
                "block": start,
                "count": count.to_string(),
            }))
            .await?;
        Ok(value
            .get("blocks")
            .map(hashes_from)
            .unwrap_or_default())
    }

    async fn ledger(
        &self,
        start: &Address,
        count: u64,
        modified_since: u64,
    ) -> Result<BTreeMap<Address, LedgerEntry>, LedgerError> {
        let value: Value = self
            .call(json!({
                "action": "ledger",
                "account": start,
                "count": count.to_string(),
                "modified_since": modified_since.to_string(),
            }))
            .await?;
        match value.get("accounts") {
            Some(accounts) if accounts.is_object() => serde_json::from_value(accounts.clone())
                .map_err(|e| LedgerError::BadResponse(e.to_string())),
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn process(&self, subtype: Subtype, block: &Block) -> Result<BlockHash, LedgerError> {
        #[derive(serde::Deserialize)]
        struct Processed {
            hash: BlockHash,
        }
        let processed: Processed = self
            .call(json!({
                "action": "process",
                "json_block": "true",
                "subtype": subtype,
                "block": block,
            }))
            .await?;
        Ok(processed.hash)
    }

    async fn work_generate(&self, root: BlockHash) -> Result<String, LedgerError> {
        #[derive(serde::Deserialize)]
        struct Work {
            work: String,
        }
        let work: Work = self
            .call(json!({ "action": "work_generate", "hash": root }))
            .await?;
        Ok(work.work)
    }

    async fn receivable(
        &self,
        account: &Address,
        count: u64,
    ) -> Result<Vec<BlockHash>, LedgerError> {
        let value: Value = self
            .call(json!({
                "action": "receivable",
                "account": account,
                "count": count.to_string(),
            }))
            .await?;
        Ok(value
            .get("blocks")
            .map(hashes_from)
            .unwrap_or_default())
    }

    async fn account_balance(&self, account: &Address) -> Result<(u128, u128), LedgerError> {
        let value: Value = self
            .call(json!({ "action": "account_balance", "account": account }))
            .await?;
        let field = |name: &str| -> Result<u128, LedgerError> {
            value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or("0")
                .parse()
                .map_err(|_| LedgerError::BadResponse(format!("bad {name} field")))
        };
        let receivable = match value.get("receivable") {
            Some(_) => field("receivable")?,
            None => field("pending")?,
        };
        Ok((field("balance")?, receivable))
    }
}

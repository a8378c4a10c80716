//! An in-memory base-ledger node.
//!
//! [`TestLedger`] implements the full [`NodeClient`] surface over an
//! in-process block store: per-account chains, send/receive pending
//! tracking, subtype classification, signature checks and the `Fork` /
//! `Unreceivable` conditions — enough for the wallet, the replayer and the
//! discovery loop to run end-to-end without a live node.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use tkn_ledger::{
    AccountInfo, Address, Block, BlockHash, BlockInfo, LedgerEntry, LedgerError, NodeClient,
    Subtype,
};

#[derive(Clone)]
struct StoredBlock {
    block: Block,
    subtype: Subtype,
    height: u64,
    amount: u128,
}

struct AccountChain {
    hashes: Vec<BlockHash>,
    modified: u64,
}

struct Pending {
    destination: Address,
    amount: u128,
}

#[derive(Default)]
struct State {
    blocks: HashMap<BlockHash, StoredBlock>,
    accounts: HashMap<Address, AccountChain>,
    pending: HashMap<BlockHash, Pending>,
    fund_counter: u64,
}

/// The in-memory node.
#[derive(Default)]
pub struct TestLedger {
    state: Mutex<State>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl TestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Conjure an open block holding `amount` raw for a fresh account. The
    /// open block's representative points back at the account itself, like
    /// any ordinary (non-chain) account.
    pub fn fund(&self, address: &Address, amount: u128) {
        let mut state = self.lock();
        if state.accounts.contains_key(address) {
            return;
        }
        state.fund_counter += 1;
        let mut link = [0u8; 32];
        link[..8].copy_from_slice(&state.fund_counter.to_be_bytes());
        let block = Block {
            kind: "state".into(),
            account: *address,
            previous: BlockHash::zero(),
            representative: *address,
            balance: amount,
            link: BlockHash::from_bytes(link),
            link_as_account: Address::from_pubkey(link),
            signature: String::new(),
            work: String::new(),
        };
        let hash = block.hash();
        state.blocks.insert(
            hash,
            StoredBlock {
                block,
                subtype: Subtype::Open,
                height: 1,
                amount,
            },
        );
        state.accounts.insert(
            *address,
            AccountChain {
                hashes: vec![hash],
                modified: unix_now(),
            },
        );
    }

    /// Number of blocks on an account chain.
    pub fn block_count(&self, address: &Address) -> u64 {
        self.lock()
            .accounts
            .get(address)
            .map(|chain| chain.hashes.len() as u64)
            .unwrap_or(0)
    }
}

fn verify_signature(block: &Block, hash: &BlockHash) -> Result<(), LedgerError> {
    let bad = || LedgerError::Node("Bad signature".into());
    let bytes = hex::decode(&block.signature).map_err(|_| bad())?;
    let bytes: [u8; 64] = bytes.try_into().map_err(|_| bad())?;
    let signature = Signature::from_bytes(&bytes);
    let key = VerifyingKey::from_bytes(block.account.as_pubkey()).map_err(|_| bad())?;
    key.verify(hash.as_bytes(), &signature).map_err(|_| bad())
}

#[async_trait]
impl NodeClient for TestLedger {
    async fn account_info(&self, account: &Address) -> Result<AccountInfo, LedgerError> {
        let state = self.lock();
        let chain = state
            .accounts
            .get(account)
            .ok_or(LedgerError::AccountNotFound)?;
        let frontier = *chain.hashes.last().ok_or(LedgerError::AccountNotFound)?;
        let head = &state.blocks[&frontier];
        Ok(AccountInfo {
            frontier,
            open_block: chain.hashes[0],
            representative: head.block.representative,
            balance: head.block.balance,
            block_count: chain.hashes.len() as u64,
        })
    }

    async fn block_info(&self, hash: BlockHash) -> Result<BlockInfo, LedgerError> {
        let state = self.lock();
        let stored = state
            .blocks
            .get(&hash)
            .ok_or_else(|| LedgerError::Node("Block not found".into()))?;
        Ok(BlockInfo {
            block_account: stored.block.account,
            amount: stored.amount,
            height: stored.height,
            subtype: stored.subtype,
            contents: stored.block.clone(),
        })
    }

    async fn blocks(
        &self,
        hashes: &[BlockHash],
    ) -> Result<HashMap<BlockHash, Block>, LedgerError> {
        let state = self.lock();
        Ok(hashes
            .iter()
            .filter_map(|hash| {
                state
                    .blocks
                    .get(hash)
                    .map(|stored| (*hash, stored.block.clone()))
            })
            .collect())
    }

    async fn successors(
        &self,
        start: BlockHash,
        count: i64,
    ) -> Result<Vec<BlockHash>, LedgerError> {
        let state = self.lock();
        let stored = state
            .blocks
            .get(&start)
            .ok_or_else(|| LedgerError::Node("Block not found".into()))?;
        let chain = state
            .accounts
            .get(&stored.block.account)
            .ok_or_else(|| LedgerError::Node("Block not found".into()))?;
        let from = (stored.height - 1) as usize;
        let mut hashes: Vec<BlockHash> = chain.hashes[from..].to_vec();
        if count >= 0 {
            hashes.truncate(count as usize);
        }
        Ok(hashes)
    }

    async fn ledger(
        &self,
        start: &Address,
        count: u64,
        modified_since: u64,
    ) -> Result<BTreeMap<Address, LedgerEntry>, LedgerError> {
        let state = self.lock();
        let mut addresses: Vec<Address> = state
            .accounts
            .iter()
            .filter(|&(address, chain)| *address >= *start && chain.modified >= modified_since)
            .map(|(address, _)| *address)
            .collect();
        addresses.sort();
        let mut out = BTreeMap::new();
        for address in addresses.into_iter().take(count as usize) {
            let chain = &state.accounts[&address];
            let frontier = chain.hashes[chain.hashes.len() - 1];
            out.insert(
                address,
                LedgerEntry {
                    frontier,
                    open_block: chain.hashes[0],
                    balance: state.blocks[&frontier].block.balance,
                    modified_timestamp: chain.modified,
                },
            );
        }
        Ok(out)
    }

    async fn process(&self, subtype: Subtype, block: &Block) -> Result<BlockHash, LedgerError> {
        let hash = block.hash();
        verify_signature(block, &hash)?;
        let mut state = self.lock();
        if state.blocks.contains_key(&hash) {
            return Err(LedgerError::Node("Old block".into()));
        }
        let (previous_balance, height) = match state.accounts.get(&block.account) {
            None => {
                if !block.previous.is_zero() {
                    return Err(LedgerError::Node("Gap previous block".into()));
                }
                (0, 1)
            }
            Some(chain) => {
                let frontier = chain.hashes[chain.hashes.len() - 1];
                if block.previous != frontier {
                    return Err(LedgerError::Fork);
                }
                (state.blocks[&frontier].block.balance, chain.hashes.len() as u64 + 1)
            }
        };
        let (stored_subtype, amount) = match subtype {
            Subtype::Send => {
                let amount = previous_balance
                    .checked_sub(block.balance)
                    .ok_or_else(|| LedgerError::Node("Invalid send balance".into()))?;
                state.pending.insert(
                    hash,
                    Pending {
                        destination: Address::from_pubkey(*block.link.as_bytes()),
                        amount,
                    },
                );
                (Subtype::Send, amount)
            }
            Subtype::Receive | Subtype::Open => {
                let pending = state
                    .pending
                    .get(&block.link)
                    .ok_or(LedgerError::Unreceivable)?;
                if pending.destination != block.account {
                    return Err(LedgerError::Unreceivable);
                }
                let expected = previous_balance
                    .checked_add(pending.amount)
                    .ok_or_else(|| LedgerError::Node("Invalid receive balance".into()))?;
                if block.balance != expected {
                    return Err(LedgerError::Node("Invalid receive balance".into()));
                }
                let amount = pending.amount;
                state.pending.remove(&block.link);
                let stored = if block.previous.is_zero() {
                    Subtype::Open
                } else {
                    Subtype::Receive
                };
                (stored, amount)
            }
            Subtype::Change | Subtype::Epoch => {
                if block.balance != previous_balance {
                    return Err(LedgerError::Node("Invalid change balance".into()));
                }
                (subtype, 0)
            }
        };
        let mut stored = block.clone();
        stored.link_as_account = Address::from_pubkey(*block.link.as_bytes());
        state.blocks.insert(
            hash,
            StoredBlock {
                block: stored,
                subtype: stored_subtype,
                height,
                amount,
            },
        );
        let now = unix_now();
        let chain = state
            .accounts
            .entry(block.account)
            .or_insert_with(|| AccountChain {
                hashes: Vec::new(),
                modified: now,
            });
        chain.hashes.push(hash);
        chain.modified = now;
        Ok(hash)
    }

    async fn work_generate(&self, _root: BlockHash) -> Result<String, LedgerError> {
        Ok("0000000000000000".into())
    }

    async fn receivable(
        &self,
        account: &Address,
        count: u64,
    ) -> Result<Vec<BlockHash>, LedgerError> {
        let state = self.lock();
        let mut hashes: Vec<BlockHash> = state
            .pending
            .iter()
            .filter(|(_, pending)| pending.destination == *account)
            .map(|(hash, _)| *hash)
            .collect();
        hashes.sort();
        hashes.truncate(count as usize);
        Ok(hashes)
    }

    async fn account_balance(&self, account: &Address) -> Result<(u128, u128), LedgerError> {
        let state = self.lock();
        let balance = state
            .accounts
            .get(account)
            .and_then(|chain| chain.hashes.last())
            .map(|frontier| state.blocks[frontier].block.balance)
            .unwrap_or(0);
        let receivable = state
            .pending
            .values()
            .filter(|pending| pending.destination == *account)
            .map(|pending| pending.amount)
            .sum();
        Ok((balance, receivable))
    }
}

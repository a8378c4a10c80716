//! Deterministic seed-derived wallet accounts.
//!
//! A signing key is derived as blake2b-256 over the 32-byte seed and a
//! big-endian account index; the address is the ed25519 public key. Blocks
//! are built, signed and published through a [`NodeClient`], with work
//! requested from the node.

use blake2b_simd::Params;
use ed25519_dalek::{Signer, SigningKey};

use crate::address::Address;
use crate::error::LedgerError;
use crate::rpc::NodeClient;
use crate::types::{Block, BlockHash, Subtype};

const RECEIVABLE_BATCH: u64 = 100;

/// A single signing account.
#[derive(Debug)]
pub struct Account {
    key: SigningKey,
    address: Address,
    /// Representative payload applied to every block this account publishes.
    /// `None` keeps whatever the account chain already advertises.
    representative: Option<[u8; 32]>,
}

impl Account {
    /// Derive the account at `index` under `seed`.
    pub fn from_seed(seed: &[u8; 32], index: u32) -> Self {
        let digest = Params::new()
            .hash_length(32)
            .to_state()
            .update(seed)
            .update(&index.to_be_bytes())
            .finalize();
        let mut secret = [0u8; 32];
        secret.copy_from_slice(digest.as_bytes());
        let key = SigningKey::from_bytes(&secret);
        let address = Address::from_pubkey(key.verifying_key().to_bytes());
        Self {
            key,
            address,
            representative: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Set the raw 32-byte representative payload carried by every block
    /// this account publishes from now on.
    pub fn set_representative(&mut self, data: [u8; 32]) {
        self.representative = Some(data);
    }

    /// Confirmed and receivable balance.
    pub async fn balance(&self, node: &dyn NodeClient) -> Result<(u128, u128), LedgerError> {
        node.account_balance(&self.address).await
    }

    /// Send `amount` raw to `destination`. Returns the send block hash.
    pub async fn send(
        &self,
        node: &dyn NodeClient,
        destination: &Address,
        amount: u128,
    ) -> Result<BlockHash, LedgerError> {
        let info = node.account_info(&self.address).await?;
        let balance = info
            .balance
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance)?;
        let representative = match self.representative {
            Some(data) => Address::from_pubkey(data),
            None => info.representative,
        };
        let block = self
            .seal(
                node,
                Block {
                    kind: "state".into(),
                    account: self.address,
                    previous: info.frontier,
                    representative,
                    balance,
                    link: BlockHash::from_bytes(*destination.as_pubkey()),
                    link_as_account: *destination,
                    signature: String::new(),
                    work: String::new(),
                },
            )
            .await?;
        node.process(Subtype::Send, &block).await
    }

    /// Receive the send block `link`. Opens the account if necessary.
    ///
    /// Fails with [`LedgerError::Fork`] when another block took this frontier
    /// first and [`LedgerError::Unreceivable`] when the send was already
    /// received; callers decide how to recover.
    pub async fn receive_pending(
        &self,
        node: &dyn NodeClient,
        link: BlockHash,
    ) -> Result<BlockHash, LedgerError> {
        let amount = node.block_info(link).await?.amount;
        let (previous, balance, representative) = match node.account_info(&self.address).await {
            Ok(info) => {
                let balance = info
                    .balance
                    .checked_add(amount)
                    .ok_or_else(|| LedgerError::Node("balance overflow".into()))?;
                let representative = match self.representative {
                    Some(data) => Address::from_pubkey(data),
                    None => info.representative,
                };
                (info.frontier, balance, representative)
            }
            Err(LedgerError::AccountNotFound) => {
                let representative = match self.representative {
                    Some(data) => Address::from_pubkey(data),
                    None => self.address,
                };
                (BlockHash::zero(), amount, representative)
            }
            Err(e) => return Err(e),
        };
        let block = self
            .seal(
                node,
                Block {
                    kind: "state".into(),
                    account: self.address,
                    previous,
                    representative,
                    balance,
                    link,
                    link_as_account: Address::zero(),
                    signature: String::new(),
                    work: String::new(),
                },
            )
            .await?;
        node.process(Subtype::Receive, &block).await
    }

    /// Receive everything currently receivable.
    pub async fn receive_pendings(&self, node: &dyn NodeClient) -> Result<(), LedgerError> {
        loop {
            let links = node.receivable(&self.address, RECEIVABLE_BATCH).await?;
            if links.is_empty() {
                return Ok(());
            }
            for link in links {
                match self.receive_pending(node, link).await {
                    Ok(_) | Err(LedgerError::Unreceivable) => {}
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// Attach work and a signature to a block under construction.
    async fn seal(&self, node: &dyn NodeClient, mut block: Block) -> Result<Block, LedgerError> {
        let root = if block.previous.is_zero() {
            BlockHash::from_bytes(*self.address.as_pubkey())
        } else {
            block.previous
        };
        block.work = node.work_generate(root).await?;
        let signature = self.key.sign(block.hash().as_bytes());
        block.signature = hex::encode_upper(signature.to_bytes());
        Ok(block)
    }
}

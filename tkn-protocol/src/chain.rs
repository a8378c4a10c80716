//! The chain replayer and publisher.
//!
//! A chain is one base-ledger account, identified by the 32-byte seed its
//! open block advertises in the representative field. Replay walks the
//! account's receive blocks in order, decodes each source block's
//! representative as a protocol message and folds it into the token and swap
//! state. Publishing runs the same protocol in reverse through a wallet
//! account.

use std::collections::BTreeMap;

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use tkn_ledger::{Account, Address, Block, BlockHash, BlockInfo, LedgerError, NodeClient, Subtype};

use crate::codec::Message;
use crate::error::ProtocolError;
use crate::swap::Swap;
use crate::token::Token;

/// A token chain and its replayed state.
#[derive(Debug)]
pub struct Chain {
    seed: [u8; 32],
    account: Account,
    frontier: Option<BlockHash>,
    tokens: BTreeMap<u32, Token>,
    swaps: BTreeMap<u32, Swap>,
}

impl Chain {
    /// Build the chain identified by `seed`.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            account: Account::from_seed(&seed, 0),
            seed,
            frontier: None,
            tokens: BTreeMap::new(),
            swaps: BTreeMap::new(),
        }
    }

    /// Create a brand-new chain with a random seed. The chain account's
    /// representative is pointed at the seed so the open block advertises it
    /// and discovery can recognize the chain.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let mut chain = Self::from_seed(seed);
        chain.account.set_representative(seed);
        chain
    }

    /// Load an existing chain by address: the open block's representative is
    /// the candidate seed, which must derive back to `address`.
    pub async fn from_address(
        node: &dyn NodeClient,
        address: Address,
    ) -> Result<Self, ProtocolError> {
        let info = node.account_info(&address).await?;
        let open = node.block_info(info.open_block).await?;
        let chain = Self::from_seed(*open.contents.representative.as_pubkey());
        if chain.address() != address {
            return Err(ProtocolError::AddressMismatch);
        }
        Ok(chain)
    }

    pub fn seed(&self) -> [u8; 32] {
        self.seed
    }

    pub fn address(&self) -> Address {
        self.account.address()
    }

    /// The last block hash this chain has fully replayed.
    pub fn frontier(&self) -> Option<BlockHash> {
        self.frontier
    }

    /// Tokens by mint height.
    pub fn tokens(&self) -> &BTreeMap<u32, Token> {
        &self.tokens
    }

    /// In-flight swaps by proposal height.
    pub fn swaps(&self) -> &BTreeMap<u32, Swap> {
        &self.swaps
    }

    /// The token minted by the block `hash`.
    pub fn token(&self, hash: BlockHash) -> Result<&Token, ProtocolError> {
        self.token_entry(hash).map(|(_, token)| token)
    }

    /// The swap proposed by the block `hash`.
    pub fn swap(&self, hash: BlockHash) -> Result<&Swap, ProtocolError> {
        self.swaps
            .values()
            .find(|swap| swap.hash() == hash)
            .ok_or(ProtocolError::SwapNotFound)
    }

    /// Reinstate the frontier from persisted state.
    pub fn restore_frontier(&mut self, frontier: BlockHash) {
        self.frontier = Some(frontier);
    }

    /// Reinstate a token from persisted state.
    pub fn restore_token(&mut self, height: u32, token: Token) {
        self.tokens.insert(height, token);
    }

    fn token_entry(&self, hash: BlockHash) -> Result<(u32, &Token), ProtocolError> {
        self.tokens
            .iter()
            .find(|(_, token)| token.hash() == hash)
            .map(|(height, token)| (*height, token))
            .ok_or(ProtocolError::TokenNotFound)
    }

    fn swap_entry(&self, hash: BlockHash) -> Result<(u32, &Swap), ProtocolError> {
        self.swaps
            .iter()
            .find(|(_, swap)| swap.hash() == hash)
            .map(|(height, swap)| (*height, swap))
            .ok_or(ProtocolError::SwapNotFound)
    }

    /// Replay the chain account forward from the stored frontier.
    ///
    /// Every block up to the head advances the frontier exactly once;
    /// malformed payloads and semantically invalid messages are consumed as
    /// no-ops. A ledger error aborts the walk with the frontier resting on
    /// the last fully processed block, so the next call resumes there.
    pub async fn parse(&mut self, node: &dyn NodeClient) -> Result<(), ProtocolError> {
        let frontier = match self.frontier {
            Some(frontier) => frontier,
            None => {
                let open = node.account_info(&self.address()).await?.open_block;
                self.frontier = Some(open);
                open
            }
        };
        let hashes = node.successors(frontier, -1).await?;
        for hash in hashes.into_iter().skip(1) {
            let info = node.block_info(hash).await?;
            if info.subtype != Subtype::Receive {
                self.frontier = Some(hash);
                continue;
            }
            let height = info.height as u32;
            let source = node.block_info(info.contents.link).await?;
            let payload = *source.contents.representative.as_pubkey();
            if let Ok(message) = Message::parse(&payload) {
                self.apply(node, message, hash, height, &source).await?;
            }
            self.frontier = Some(hash);
        }
        Ok(())
    }

    async fn apply(
        &mut self,
        node: &dyn NodeClient,
        message: Message,
        hash: BlockHash,
        height: u32,
        source: &BlockInfo,
    ) -> Result<bool, ProtocolError> {
        let op = message.op();
        let applied = match message {
            Message::Genesis {
                name,
                supply,
                decimals,
            } => {
                self.tokens.insert(
                    height,
                    Token::mint(hash, name, supply, decimals, source.block_account),
                );
                true
            }
            Message::Transfer { token, amount } => {
                self.apply_transfer(node, token, amount, source).await?
            }
            Message::SwapPropose { token, amount } => {
                self.apply_propose(node, hash, height, token, amount, source)
                    .await?
            }
            Message::SwapAccept {
                swap,
                token,
                amount,
            } => self.apply_accept(swap, token, amount, source),
            Message::SwapConfirm { swap } => self.apply_confirm(swap, source),
            Message::SwapCancel { swap } => self.apply_cancel(swap, source),
        };
        debug!(
            "chain {}: op {} at height {} {}",
            self.address(),
            op,
            height,
            if applied { "applied" } else { "skipped" }
        );
        Ok(applied)
    }

    async fn apply_transfer(
        &mut self,
        node: &dyn NodeClient,
        token_height: u32,
        amount: u128,
        source: &BlockInfo,
    ) -> Result<bool, ProtocolError> {
        let Some(token) = self.tokens.get(&token_height) else {
            return Ok(false);
        };
        if token.check_balance(&source.block_account, amount).is_err() {
            return Ok(false);
        }
        let Some(destination) = self.pair_destination(node, &source.contents).await? else {
            return Ok(false);
        };
        self.move_tokens(token_height, &source.block_account, &destination, amount);
        Ok(true)
    }

    async fn apply_propose(
        &mut self,
        node: &dyn NodeClient,
        hash: BlockHash,
        height: u32,
        token_height: u32,
        amount: u128,
        source: &BlockInfo,
    ) -> Result<bool, ProtocolError> {
        let Some(token) = self.tokens.get(&token_height) else {
            return Ok(false);
        };
        if token.check_balance(&source.block_account, amount).is_err() {
            return Ok(false);
        }
        let Some(counterparty) = self.pair_destination(node, &source.contents).await? else {
            return Ok(false);
        };
        self.swaps.insert(
            height,
            Swap::propose(hash, source.block_account, token_height, amount, counterparty),
        );
        Ok(true)
    }

    fn apply_accept(
        &mut self,
        swap_height: u32,
        token_height: u32,
        amount: u128,
        source: &BlockInfo,
    ) -> bool {
        let Some(swap) = self.swaps.get(&swap_height) else {
            return false;
        };
        let Some(token) = self.tokens.get(&token_height) else {
            return false;
        };
        if swap.check_accept(&source.block_account).is_err() {
            return false;
        }
        if token.check_balance(&source.block_account, amount).is_err() {
            return false;
        }
        if let Some(swap) = self.swaps.get_mut(&swap_height) {
            swap.accept(source.block_account, token_height, amount);
        }
        true
    }

    fn apply_confirm(&mut self, swap_height: u32, source: &BlockInfo) -> bool {
        let Some(swap) = self.swaps.get(&swap_height) else {
            return false;
        };
        if swap.check_confirm(&source.block_account).is_err() {
            return false;
        }
        // the accept check passed once, but an intervening transfer may have
        // drained either side since
        if self.check_swap_balances(swap).is_err() {
            return false;
        }
        let left = swap.left().clone();
        let right = swap.right().clone();
        let (Some(left_token), Some(right_token)) = (left.token, right.token) else {
            return false;
        };
        self.move_tokens(left_token, &left.account, &right.account, left.amount);
        self.move_tokens(right_token, &right.account, &left.account, right.amount);
        self.finalize_swap(swap_height);
        true
    }

    fn apply_cancel(&mut self, swap_height: u32, source: &BlockInfo) -> bool {
        let Some(swap) = self.swaps.get(&swap_height) else {
            return false;
        };
        if swap.check_cancel(&source.block_account).is_err() {
            return false;
        }
        self.finalize_swap(swap_height);
        true
    }

    fn finalize_swap(&mut self, swap_height: u32) {
        if let Some(mut swap) = self.swaps.remove(&swap_height) {
            swap.finalize();
        }
    }

    /// Both sides of an accepted swap must still cover their amounts.
    fn check_swap_balances(&self, swap: &Swap) -> Result<(), ProtocolError> {
        for side in [swap.left(), swap.right()] {
            let height = side.token.ok_or(ProtocolError::SwapNotAccepted)?;
            let token = self.tokens.get(&height).ok_or(ProtocolError::TokenNotFound)?;
            token.check_balance(&side.account, side.amount)?;
        }
        Ok(())
    }

    /// Move `amount` of the token minted at `height` between two accounts.
    /// Callers have already verified the debit is covered.
    fn move_tokens(&mut self, height: u32, from: &Address, to: &Address, amount: u128) {
        if let Some(token) = self.tokens.get_mut(&height) {
            if token.debit(from, amount).is_ok() {
                token.credit(to, amount);
            }
        }
    }

    /// Resolve the protocol-level destination of a message.
    ///
    /// The block preceding the source block must be a send carrying the same
    /// representative payload; its `link_as_account` is the destination.
    /// Anything else means the message has no destination and is a no-op.
    async fn pair_destination(
        &self,
        node: &dyn NodeClient,
        source: &Block,
    ) -> Result<Option<Address>, ProtocolError> {
        if source.previous.is_zero() {
            return Ok(None);
        }
        let info = node.block_info(source.previous).await?;
        if info.subtype != Subtype::Send {
            return Ok(None);
        }
        if info.contents.representative != source.representative {
            return Ok(None);
        }
        Ok(Some(info.contents.link_as_account))
    }

    // ── publishing ─────────────────────────────────────────────────────────

    /// Block until the chain account's open block exists, receiving anything
    /// already sent to it.
    pub async fn wait_for_open(&mut self, node: &dyn NodeClient) -> Result<(), ProtocolError> {
        loop {
            let (balance, receivable) = self.account.balance(node).await?;
            if balance > 0 {
                return Ok(());
            }
            if receivable > 0 {
                self.account.receive_pendings(node).await?;
                continue;
            }
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        }
    }

    /// Mint a new token. Returns the mint block hash, which doubles as the
    /// token's external identity.
    pub async fn token_genesis(
        &mut self,
        node: &dyn NodeClient,
        account: &mut Account,
        name: &str,
        supply: u128,
        decimals: u8,
    ) -> Result<BlockHash, ProtocolError> {
        self.parse(node).await?;
        self.publish(
            node,
            account,
            None,
            &Message::Genesis {
                name: name.to_string(),
                supply,
                decimals,
            },
        )
        .await
    }

    /// Transfer `amount` of the token minted by `token_hash` to `destination`.
    pub async fn transfer(
        &mut self,
        node: &dyn NodeClient,
        account: &mut Account,
        token_hash: BlockHash,
        destination: Address,
        amount: u128,
    ) -> Result<BlockHash, ProtocolError> {
        self.parse(node).await?;
        let (height, token) = self.token_entry(token_hash)?;
        token.check_balance(&account.address(), amount)?;
        self.publish(
            node,
            account,
            Some(destination),
            &Message::Transfer {
                token: height,
                amount,
            },
        )
        .await
    }

    /// Propose swapping `amount` of `token_hash` with `counterparty`.
    pub async fn propose_swap(
        &mut self,
        node: &dyn NodeClient,
        account: &mut Account,
        counterparty: Address,
        token_hash: BlockHash,
        amount: u128,
    ) -> Result<BlockHash, ProtocolError> {
        self.parse(node).await?;
        let (height, token) = self.token_entry(token_hash)?;
        token.check_balance(&account.address(), amount)?;
        self.publish(
            node,
            account,
            Some(counterparty),
            &Message::SwapPropose {
                token: height,
                amount,
            },
        )
        .await
    }

    /// Accept the swap proposed by `swap_hash`, offering `amount` of the
    /// token minted by `token_hash`.
    pub async fn accept_swap(
        &mut self,
        node: &dyn NodeClient,
        account: &mut Account,
        swap_hash: BlockHash,
        token_hash: BlockHash,
        amount: u128,
    ) -> Result<BlockHash, ProtocolError> {
        self.parse(node).await?;
        let (swap_height, swap) = self.swap_entry(swap_hash)?;
        let (token_height, token) = self.token_entry(token_hash)?;
        swap.check_accept(&account.address())?;
        token.check_balance(&account.address(), amount)?;
        self.publish(
            node,
            account,
            None,
            &Message::SwapAccept {
                swap: swap_height,
                token: token_height,
                amount,
            },
        )
        .await
    }

    /// Confirm an accepted swap, executing both legs.
    pub async fn confirm_swap(
        &mut self,
        node: &dyn NodeClient,
        account: &mut Account,
        swap_hash: BlockHash,
    ) -> Result<BlockHash, ProtocolError> {
        self.parse(node).await?;
        let (swap_height, swap) = self.swap_entry(swap_hash)?;
        swap.check_confirm(&account.address())?;
        self.check_swap_balances(swap)?;
        self.publish(node, account, None, &Message::SwapConfirm { swap: swap_height })
            .await
    }

    /// Cancel an active swap from either side.
    pub async fn cancel_swap(
        &mut self,
        node: &dyn NodeClient,
        account: &mut Account,
        swap_hash: BlockHash,
    ) -> Result<BlockHash, ProtocolError> {
        self.parse(node).await?;
        let (swap_height, swap) = self.swap_entry(swap_hash)?;
        swap.check_cancel(&account.address())?;
        self.publish(node, account, None, &Message::SwapCancel { swap: swap_height })
            .await
    }

    /// Publish a message from `account`: point its representative at the
    /// payload, send 1 raw to the destination if the op names one, then send
    /// 1 raw to the chain account. The chain's receive of that final send is
    /// the message's canonical identity.
    async fn publish(
        &mut self,
        node: &dyn NodeClient,
        account: &mut Account,
        destination: Option<Address>,
        message: &Message,
    ) -> Result<BlockHash, ProtocolError> {
        account.set_representative(message.serialize());
        if let Some(destination) = destination {
            account.send(node, &destination, 1).await?;
        }
        let send = account.send(node, &self.address(), 1).await?;
        let hash = self.receive_published(node, send).await?;
        self.parse(node).await?;
        Ok(hash)
    }

    /// Receive the send carrying a just-published message on the chain
    /// account. A fork means another writer took the frontier first: retry.
    /// Unreceivable means the send was already received (for instance by a
    /// concurrently running indexer): walk the successors to find it.
    async fn receive_published(
        &mut self,
        node: &dyn NodeClient,
        link: BlockHash,
    ) -> Result<BlockHash, ProtocolError> {
        loop {
            match self.account.receive_pending(node, link).await {
                Ok(hash) => return Ok(hash),
                Err(LedgerError::Fork) => continue,
                Err(LedgerError::Unreceivable) => {
                    let frontier = match self.frontier {
                        Some(frontier) => frontier,
                        None => node.account_info(&self.address()).await?.open_block,
                    };
                    for hash in node.successors(frontier, -1).await?.into_iter().skip(1) {
                        let info = node.block_info(hash).await?;
                        if info.contents.link == link {
                            return Ok(hash);
                        }
                    }
                    return Err(LedgerError::Unreceivable.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

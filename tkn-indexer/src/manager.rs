//! The chain manager: discovery, replay and persistence scheduling.
//!
//! Discovery enumerates the base ledger from the all-zero address in batches,
//! using a modified-since watermark. An account is a token chain when its
//! open block's representative, read as a 32-byte seed, derives back to the
//! account's own address. Each registered chain lives behind its own
//! `RwLock`; the replayer takes the write side, queries take the read side.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use tkn_ledger::{Address, Block, BlockHash, ConfirmationStream, NodeClient};
use tkn_protocol::Chain;

use crate::config::Config;
use crate::store::Store;

const BATCH_SIZE: u64 = 10_000;
/// 2020-12-25T00:00:00Z, the protocol's epoch: nothing older can be a chain.
const DEFAULT_WATERMARK: i64 = 1_608_854_400;

pub struct ChainManager {
    node: Arc<dyn NodeClient>,
    store: Store,
    chains: Mutex<HashMap<Address, Arc<RwLock<Chain>>>>,
    last_updated: Mutex<i64>,
}

impl ChainManager {
    /// Build a manager over `node` and `store`, reloading any persisted
    /// chains and the discovery watermark.
    pub async fn new(node: Arc<dyn NodeClient>, store: Store) -> Result<Arc<Self>> {
        let watermark = store.load_watermark().await?.unwrap_or(DEFAULT_WATERMARK);
        let mut chains = HashMap::new();
        for chain in store.load_chains().await? {
            chains.insert(chain.address(), Arc::new(RwLock::new(chain)));
        }
        info!("loaded {} chains from the store", chains.len());
        Ok(Arc::new(Self {
            node,
            store,
            chains: Mutex::new(chains),
            last_updated: Mutex::new(watermark),
        }))
    }

    /// One full discovery pass over the ledger.
    ///
    /// The watermark is bumped to now() before scanning so anything
    /// confirmed while we scan lands in the next pass. Per-chain failures
    /// are logged and skipped; the pass itself only fails when the ledger
    /// enumeration does.
    pub async fn scan(&self) -> Result<()> {
        let since = {
            let mut last = self.last_updated.lock().await;
            let since = *last;
            *last = Utc::now().timestamp();
            since
        };
        let mut cursor = Address::zero();
        loop {
            let accounts = self
                .node
                .ledger(&cursor, BATCH_SIZE, since.max(0) as u64)
                .await?;
            if accounts.is_empty() {
                break;
            }
            let hashes: Vec<BlockHash> = accounts.values().map(|entry| entry.open_block).collect();
            let blocks = self.node.blocks(&hashes).await?;
            for (address, entry) in &accounts {
                if *address == cursor {
                    continue;
                }
                let Some(open) = blocks.get(&entry.open_block) else {
                    continue;
                };
                if let Err(e) = self.scan_block(open).await {
                    warn!("chain {address}: {e:#}");
                }
            }
            let done = (accounts.len() as u64) < BATCH_SIZE;
            if let Some((last, _)) = accounts.iter().next_back() {
                cursor = *last;
            }
            if done {
                break;
            }
        }
        Ok(())
    }

    /// Route one block (from enumeration or the confirmation feed) to its
    /// chain, registering the chain first if this is its open block and the
    /// seed it advertises checks out.
    pub async fn scan_block(&self, block: &Block) -> Result<()> {
        let address = block.account;
        let existing = self.chains.lock().await.get(&address).cloned();
        let handle = match existing {
            Some(handle) => handle,
            None => {
                // only an open block can advertise a chain seed
                if !block.previous.is_zero() {
                    return Ok(());
                }
                let chain = Chain::from_seed(*block.representative.as_pubkey());
                if chain.address() != address {
                    return Ok(());
                }
                info!("discovered token chain {address}");
                let handle = Arc::new(RwLock::new(chain));
                self.chains.lock().await.insert(address, handle.clone());
                handle
            }
        };
        handle.write().await.parse(self.node.as_ref()).await?;
        self.store.save_chain(&*handle.read().await).await?;
        Ok(())
    }

    /// Replay every registered chain. Failures are per-chain and retried on
    /// the next tick.
    pub async fn replay_all(&self) {
        for (address, handle) in self.handles().await {
            if let Err(e) = handle.write().await.parse(self.node.as_ref()).await {
                warn!("chain {address}: replay failed: {e}");
            }
        }
    }

    /// Persist every chain and the watermark.
    pub async fn persist_all(&self) {
        for (address, handle) in self.handles().await {
            if let Err(e) = self.store.save_chain(&*handle.read().await).await {
                warn!("chain {address}: save failed: {e}");
            }
        }
        let watermark = *self.last_updated.lock().await;
        if let Err(e) = self.store.save_watermark(watermark).await {
            warn!("watermark save failed: {e}");
        }
    }

    /// Snapshot of the registered chain handles, for queries.
    pub async fn chain_handles(&self) -> Vec<Arc<RwLock<Chain>>> {
        self.chains.lock().await.values().cloned().collect()
    }

    async fn handles(&self) -> Vec<(Address, Arc<RwLock<Chain>>)> {
        self.chains
            .lock()
            .await
            .iter()
            .map(|(address, handle)| (*address, handle.clone()))
            .collect()
    }

    /// Spawn the background loops: discovery+replay, persistence, and the
    /// optional websocket fast path.
    pub fn spawn_loops(self: &Arc<Self>, config: &Config) {
        let manager = self.clone();
        let replay_interval = config.replay_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(replay_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = manager.scan().await {
                    warn!("ledger scan failed: {e:#}");
                }
                manager.replay_all().await;
            }
        });

        let manager = self.clone();
        let persist_interval = config.persist_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(persist_interval);
            loop {
                ticker.tick().await;
                manager.persist_all().await;
            }
        });

        if let Some(ws_url) = config.ws_url.clone() {
            let manager = self.clone();
            tokio::spawn(async move { manager.confirmation_loop(ws_url).await });
        }
    }

    /// Follow the confirmation feed, routing each confirmed block through
    /// `scan_block` without waiting for the next enumeration.
    async fn confirmation_loop(&self, url: String) {
        loop {
            match ConfirmationStream::connect(&url).await {
                Ok(mut stream) => {
                    info!("confirmation feed connected");
                    loop {
                        match stream.next().await {
                            Ok(Some(confirmation)) => {
                                if let Err(e) = self.scan_block(&confirmation.block).await {
                                    warn!("chain {}: {e:#}", confirmation.account);
                                }
                                if confirmation.time_ms > 0 {
                                    *self.last_updated.lock().await =
                                        (confirmation.time_ms / 1000) as i64;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!("confirmation feed error: {e}");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!("confirmation feed connect failed: {e}"),
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

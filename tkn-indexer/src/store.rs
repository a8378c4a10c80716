//! SQLite persistence for chain replay state.
//!
//! Single-writer discipline: one process-wide lock, one connection opened
//! per operation, one transaction per save. Saves are idempotent via
//! REPLACE; a chain whose stored frontier already matches is skipped
//! entirely.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use tkn_protocol::{Chain, Token};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chains (seed TEXT PRIMARY KEY, frontier TEXT);
CREATE TABLE IF NOT EXISTS chain_manager (id INTEGER PRIMARY KEY, lastUpdated INTEGER);
CREATE TABLE IF NOT EXISTS tokens
    (hash TEXT PRIMARY KEY, chain TEXT, height INTEGER, name TEXT, supply TEXT, decimals INTEGER);
CREATE TABLE IF NOT EXISTS token_balances
    (hash TEXT, account TEXT, balance TEXT, PRIMARY KEY (hash, account));
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

fn corrupt(context: &str, error: impl Display) -> StoreError {
    StoreError::Corrupt(format!("{context}: {error}"))
}

pub struct Store {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Persist one chain: its seed/frontier row, every token and every
    /// balance. A no-op when the stored frontier already matches.
    pub async fn save_chain(&self, chain: &Chain) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut conn = self.connect()?;
        let seed = hex::encode_upper(chain.seed());
        let frontier = chain
            .frontier()
            .map(|hash| hash.to_string())
            .unwrap_or_default();
        let stored: Option<String> = conn
            .query_row(
                "SELECT frontier FROM chains WHERE seed = ?1",
                params![seed],
                |row| row.get(0),
            )
            .optional()?;
        if stored.as_deref() == Some(frontier.as_str()) {
            return Ok(());
        }
        let tx = conn.transaction()?;
        tx.execute(
            "REPLACE INTO chains (seed, frontier) VALUES (?1, ?2)",
            params![seed, frontier],
        )?;
        let address = chain.address().to_string();
        for (height, token) in chain.tokens() {
            let hash = token.hash().to_string();
            tx.execute(
                "REPLACE INTO tokens (hash, chain, height, name, supply, decimals) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    hash,
                    address,
                    height,
                    token.name(),
                    token.supply().to_string(),
                    token.decimals()
                ],
            )?;
            for (account, balance) in token.balances() {
                tx.execute(
                    "REPLACE INTO token_balances (hash, account, balance) VALUES (?1, ?2, ?3)",
                    params![hash, account.to_string(), balance.to_string()],
                )?;
            }
        }
        tx.commit()?;
        debug!("saved chain {} at frontier {}", chain.address(), frontier);
        Ok(())
    }

    /// Load every persisted chain with its tokens and balances.
    pub async fn load_chains(&self) -> Result<Vec<Chain>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        let rows: Vec<(String, String)> = {
            let mut stmt = conn.prepare("SELECT seed, frontier FROM chains")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        let mut chains = Vec::with_capacity(rows.len());
        for (seed_hex, frontier_hex) in rows {
            let seed = hex::decode(&seed_hex)
                .ok()
                .and_then(|bytes| <[u8; 32]>::try_from(bytes).ok())
                .ok_or_else(|| corrupt("chain seed", &seed_hex))?;
            let mut chain = Chain::from_seed(seed);
            if !frontier_hex.is_empty() {
                chain.restore_frontier(
                    frontier_hex
                        .parse()
                        .map_err(|e| corrupt("chain frontier", e))?,
                );
            }
            self.load_tokens(&conn, &mut chain)?;
            chains.push(chain);
        }
        Ok(chains)
    }

    fn load_tokens(&self, conn: &Connection, chain: &mut Chain) -> Result<(), StoreError> {
        let address = chain.address().to_string();
        let rows: Vec<(String, u32, String, String, u8)> = {
            let mut stmt = conn.prepare(
                "SELECT hash, height, name, supply, decimals FROM tokens WHERE chain = ?1",
            )?;
            let rows = stmt.query_map(params![address], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?;
            rows.collect::<Result<_, _>>()?
        };
        for (hash_hex, height, name, supply, decimals) in rows {
            let mut balances = BTreeMap::new();
            let mut stmt =
                conn.prepare("SELECT account, balance FROM token_balances WHERE hash = ?1")?;
            let entries = stmt.query_map(params![hash_hex], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for entry in entries {
                let (account, balance) = entry?;
                balances.insert(
                    account.parse().map_err(|e| corrupt("balance account", e))?,
                    balance.parse().map_err(|e| corrupt("balance amount", e))?,
                );
            }
            let token = Token::restore(
                hash_hex.parse().map_err(|e| corrupt("token hash", e))?,
                name,
                supply.parse().map_err(|e| corrupt("token supply", e))?,
                decimals,
                balances,
            );
            chain.restore_token(height, token);
        }
        Ok(())
    }

    /// The discovery watermark, if one was ever saved.
    pub async fn load_watermark(&self) -> Result<Option<i64>, StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        conn.query_row(
            "SELECT lastUpdated FROM chain_manager WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub async fn save_watermark(&self, timestamp: i64) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let conn = self.connect()?;
        conn.execute(
            "REPLACE INTO chain_manager (id, lastUpdated) VALUES (1, ?1)",
            params![timestamp],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tkn_ledger::{Address, BlockHash};

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("chains.db"));
        (dir, store)
    }

    fn sample_chain(frontier: BlockHash) -> Chain {
        let mut chain = Chain::from_seed([9u8; 32]);
        chain.restore_frontier(frontier);
        let mut balances = BTreeMap::new();
        balances.insert(Address::from_pubkey([1u8; 32]), 400u128);
        balances.insert(Address::from_pubkey([2u8; 32]), 600u128);
        chain.restore_token(
            2,
            Token::restore(
                BlockHash::from_bytes([5u8; 32]),
                "TOKEN".into(),
                1_000,
                5,
                balances,
            ),
        );
        chain
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let (_dir, store) = store();
        let chain = sample_chain(BlockHash::from_bytes([7u8; 32]));
        store.save_chain(&chain).await.unwrap();

        let loaded = store.load_chains().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].address(), chain.address());
        assert_eq!(loaded[0].frontier(), chain.frontier());
        assert_eq!(loaded[0].tokens(), chain.tokens());
    }

    #[tokio::test]
    async fn unchanged_frontier_skips_the_snapshot() {
        let (_dir, store) = store();
        let frontier = BlockHash::from_bytes([7u8; 32]);
        store.save_chain(&sample_chain(frontier)).await.unwrap();

        // same frontier, different balances: the save must be skipped
        let mut altered = Chain::from_seed([9u8; 32]);
        altered.restore_frontier(frontier);
        let mut balances = BTreeMap::new();
        balances.insert(Address::from_pubkey([1u8; 32]), 1_000u128);
        altered.restore_token(
            2,
            Token::restore(
                BlockHash::from_bytes([5u8; 32]),
                "TOKEN".into(),
                1_000,
                5,
                balances,
            ),
        );
        store.save_chain(&altered).await.unwrap();

        let loaded = store.load_chains().await.unwrap();
        let token = loaded[0].tokens().get(&2).unwrap();
        assert_eq!(token.balance(&Address::from_pubkey([1u8; 32])), 400);
    }

    #[tokio::test]
    async fn advanced_frontier_rewrites_the_snapshot() {
        let (_dir, store) = store();
        store
            .save_chain(&sample_chain(BlockHash::from_bytes([7u8; 32])))
            .await
            .unwrap();
        let moved = sample_chain(BlockHash::from_bytes([8u8; 32]));
        store.save_chain(&moved).await.unwrap();

        let loaded = store.load_chains().await.unwrap();
        assert_eq!(loaded[0].frontier(), Some(BlockHash::from_bytes([8u8; 32])));
    }

    #[tokio::test]
    async fn watermark_round_trips() {
        let (_dir, store) = store();
        assert_eq!(store.load_watermark().await.unwrap(), None);
        store.save_watermark(1_700_000_000).await.unwrap();
        assert_eq!(store.load_watermark().await.unwrap(), Some(1_700_000_000));
        store.save_watermark(1_700_000_060).await.unwrap();
        assert_eq!(store.load_watermark().await.unwrap(), Some(1_700_000_060));
    }
}

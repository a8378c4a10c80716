//! Client glue for a Nano-style account-chain base ledger.
//!
//! This crate knows nothing about the token protocol itself. It provides the
//! wire types (`BlockHash`, `Address`, `Block`, `BlockInfo`), the [`NodeClient`]
//! seam over the node's JSON action protocol, an HTTP implementation of that
//! seam, a deterministic seed-derived wallet, and a websocket client for the
//! confirmation feed.

pub mod address;
pub mod error;
pub mod rpc;
pub mod types;
pub mod wallet;
pub mod ws;

pub use address::Address;
pub use error::LedgerError;
pub use rpc::{NodeClient, RpcClient};
pub use types::{AccountInfo, Block, BlockHash, BlockInfo, LedgerEntry, Subtype};
pub use wallet::Account;
pub use ws::{Confirmation, ConfirmationStream};

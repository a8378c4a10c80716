//! Error surface for base-ledger operations.

use thiserror::Error;

/// Errors produced by the RPC client, the wallet, and the confirmation feed.
///
/// `Fork` and `Unreceivable` are real node error strings promoted to variants
/// so callers can match on them instead of comparing strings.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),
    #[error("websocket transport: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("a conflicting block already exists for this root")]
    Fork,
    #[error("block is not receivable")]
    Unreceivable,
    #[error("account not found")]
    AccountNotFound,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("invalid address: {0}")]
    BadAddress(String),
    #[error("invalid block hash: {0}")]
    BadHash(String),
    #[error("unexpected node response: {0}")]
    BadResponse(String),
    #[error("node: {0}")]
    Node(String),
}

impl LedgerError {
    /// Promote a node-reported error string to its typed variant.
    pub fn from_node(message: String) -> Self {
        match message.as_str() {
            "Fork" => LedgerError::Fork,
            "Unreceivable" => LedgerError::Unreceivable,
            "Account not found" => LedgerError::AccountNotFound,
            _ => LedgerError::Node(message),
        }
    }
}

//! Protocol-level errors.
//!
//! During replay these are advisory: a failing check turns the message into
//! a no-op and the frontier still advances. On the publishing path they are
//! surfaced to the caller before anything hits the ledger.

use thiserror::Error;

use tkn_ledger::LedgerError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("token not found")]
    TokenNotFound,
    #[error("swap not found")]
    SwapNotFound,
    #[error("insufficient balance")]
    InsufficientBalance,
    #[error("swap is inactive")]
    SwapInactive,
    #[error("swap already accepted")]
    SwapAlreadyAccepted,
    #[error("swap not yet accepted")]
    SwapNotAccepted,
    #[error("only the named counterparty may accept")]
    NotCounterparty,
    #[error("only the proposer may confirm")]
    NotProposer,
    #[error("only a participant may cancel")]
    NotParticipant,
    #[error("derived account does not match the chain address")]
    AddressMismatch,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

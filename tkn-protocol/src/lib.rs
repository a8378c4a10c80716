//! The token protocol core.
//!
//! Six fixed-width messages embedded in base-ledger blocks mint, move and
//! atomically swap tokens on a "chain" (a single base-ledger account). The
//! [`Chain`] replayer walks that account's blocks and deterministically
//! rebuilds token balances and swap state; the same type also publishes new
//! messages through a wallet account.

pub mod chain;
pub mod codec;
pub mod error;
pub mod swap;
pub mod token;

pub use chain::Chain;
pub use codec::{CodecError, Message, PAYLOAD_LEN};
pub use error::ProtocolError;
pub use swap::{Swap, SwapSide};
pub use token::Token;

//! In-flight atomic swaps.
//!
//! A swap moves through propose → accept → confirm | cancel. The proposer is
//! the `left` side; the counterparty named at propose time is `right`. Only
//! `right` may accept, only `left` may confirm, either may cancel. Confirm
//! and cancel finalize the swap and remove it from the chain's registry.

use tkn_ledger::{Address, BlockHash};

use crate::error::ProtocolError;

/// One side of a swap. `token` is the mint height of the offered token on
/// the owning chain; it stays `None` on the right side until acceptance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapSide {
    pub account: Address,
    pub token: Option<u32>,
    pub amount: u128,
}

/// A proposed or accepted swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Swap {
    hash: BlockHash,
    left: SwapSide,
    right: SwapSide,
    inactive: bool,
}

impl Swap {
    pub(crate) fn propose(
        hash: BlockHash,
        proposer: Address,
        token: u32,
        amount: u128,
        counterparty: Address,
    ) -> Self {
        Self {
            hash,
            left: SwapSide {
                account: proposer,
                token: Some(token),
                amount,
            },
            right: SwapSide {
                account: counterparty,
                token: None,
                amount: 0,
            },
            inactive: false,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn left(&self) -> &SwapSide {
        &self.left
    }

    pub fn right(&self) -> &SwapSide {
        &self.right
    }

    pub fn active(&self) -> bool {
        !self.inactive
    }

    pub fn accepted(&self) -> bool {
        self.right.token.is_some()
    }

    pub(crate) fn check_accept(&self, account: &Address) -> Result<(), ProtocolError> {
        if self.inactive {
            return Err(ProtocolError::SwapInactive);
        }
        if self.accepted() {
            return Err(ProtocolError::SwapAlreadyAccepted);
        }
        if *account != self.right.account {
            return Err(ProtocolError::NotCounterparty);
        }
        Ok(())
    }

    pub(crate) fn check_confirm(&self, account: &Address) -> Result<(), ProtocolError> {
        if self.inactive {
            return Err(ProtocolError::SwapInactive);
        }
        if !self.accepted() {
            return Err(ProtocolError::SwapNotAccepted);
        }
        if *account != self.left.account {
            return Err(ProtocolError::NotProposer);
        }
        Ok(())
    }

    pub(crate) fn check_cancel(&self, account: &Address) -> Result<(), ProtocolError> {
        if self.inactive {
            return Err(ProtocolError::SwapInactive);
        }
        if *account != self.left.account && *account != self.right.account {
            return Err(ProtocolError::NotParticipant);
        }
        Ok(())
    }

    pub(crate) fn accept(&mut self, account: Address, token: u32, amount: u128) {
        self.right = SwapSide {
            account,
            token: Some(token),
            amount,
        };
    }

    pub(crate) fn finalize(&mut self) {
        self.inactive = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left() -> Address {
        Address::from_pubkey([1u8; 32])
    }

    fn right() -> Address {
        Address::from_pubkey([2u8; 32])
    }

    fn outsider() -> Address {
        Address::from_pubkey([3u8; 32])
    }

    fn proposed() -> Swap {
        Swap::propose(BlockHash::zero(), left(), 2, 1_000, right())
    }

    #[test]
    fn accept_requires_the_counterparty() {
        let swap = proposed();
        assert!(matches!(
            swap.check_accept(&left()),
            Err(ProtocolError::NotCounterparty)
        ));
        assert!(matches!(
            swap.check_accept(&outsider()),
            Err(ProtocolError::NotCounterparty)
        ));
        assert!(swap.check_accept(&right()).is_ok());
    }

    #[test]
    fn accept_is_one_shot() {
        let mut swap = proposed();
        swap.accept(right(), 3, 2_000);
        assert!(swap.accepted());
        assert!(matches!(
            swap.check_accept(&right()),
            Err(ProtocolError::SwapAlreadyAccepted)
        ));
    }

    #[test]
    fn confirm_requires_acceptance_and_the_proposer() {
        let mut swap = proposed();
        assert!(matches!(
            swap.check_confirm(&left()),
            Err(ProtocolError::SwapNotAccepted)
        ));
        swap.accept(right(), 3, 2_000);
        assert!(matches!(
            swap.check_confirm(&right()),
            Err(ProtocolError::NotProposer)
        ));
        assert!(swap.check_confirm(&left()).is_ok());
    }

    #[test]
    fn either_participant_may_cancel() {
        let swap = proposed();
        assert!(swap.check_cancel(&left()).is_ok());
        assert!(swap.check_cancel(&right()).is_ok());
        assert!(matches!(
            swap.check_cancel(&outsider()),
            Err(ProtocolError::NotParticipant)
        ));
    }

    #[test]
    fn finalized_swap_rejects_every_transition() {
        let mut swap = proposed();
        swap.accept(right(), 3, 2_000);
        swap.finalize();
        assert!(!swap.active());
        assert!(matches!(
            swap.check_accept(&right()),
            Err(ProtocolError::SwapInactive)
        ));
        assert!(matches!(
            swap.check_confirm(&left()),
            Err(ProtocolError::SwapInactive)
        ));
        assert!(matches!(
            swap.check_cancel(&right()),
            Err(ProtocolError::SwapInactive)
        ));
    }
}

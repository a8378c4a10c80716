//! Per-token balance ledger.

use std::collections::BTreeMap;

use tkn_ledger::{Address, BlockHash};

use crate::error::ProtocolError;

/// A token minted on a chain.
///
/// The hash of the receive block that minted it is its external identity;
/// within the chain it is referenced by the mint height. The sum of all
/// balances always equals `supply`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    hash: BlockHash,
    name: String,
    supply: u128,
    decimals: u8,
    balances: BTreeMap<Address, u128>,
}

impl Token {
    /// Mint a new token, assigning the full supply to `minter`.
    pub(crate) fn mint(
        hash: BlockHash,
        name: String,
        supply: u128,
        decimals: u8,
        minter: Address,
    ) -> Self {
        let mut balances = BTreeMap::new();
        balances.insert(minter, supply);
        Self {
            hash,
            name,
            supply,
            decimals,
            balances,
        }
    }

    /// Reconstruct a token from persisted state.
    pub fn restore(
        hash: BlockHash,
        name: String,
        supply: u128,
        decimals: u8,
        balances: BTreeMap<Address, u128>,
    ) -> Self {
        Self {
            hash,
            name,
            supply,
            decimals,
            balances,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn supply(&self) -> u128 {
        self.supply
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// Balance of `account`; absent accounts hold zero.
    pub fn balance(&self, account: &Address) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn balances(&self) -> &BTreeMap<Address, u128> {
        &self.balances
    }

    /// Sum of all balances. Equals `supply` unless something is badly wrong.
    pub fn circulating(&self) -> u128 {
        self.balances.values().sum()
    }

    pub(crate) fn check_balance(
        &self,
        account: &Address,
        amount: u128,
    ) -> Result<(), ProtocolError> {
        if self.balance(account) < amount {
            return Err(ProtocolError::InsufficientBalance);
        }
        Ok(())
    }

    /// Remove `amount` from `account`. A drained entry stays in the map at
    /// zero, matching what persists and what queries report.
    pub(crate) fn debit(&mut self, account: &Address, amount: u128) -> Result<(), ProtocolError> {
        let balance = self.balance(account);
        let remaining = balance
            .checked_sub(amount)
            .ok_or(ProtocolError::InsufficientBalance)?;
        self.balances.insert(*account, remaining);
        Ok(())
    }

    /// Add `amount` to `account`.
    ///
    /// Panics on overflow: every credit is paired with an equal debit (or
    /// the genesis supply), so an overflowing credit means the supply
    /// invariant was already broken and clamping would only hide it.
    pub(crate) fn credit(&mut self, account: &Address, amount: u128) {
        let entry = self.balances.entry(*account).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .expect("credit overflow: supply invariant violated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minter() -> Address {
        Address::from_pubkey([1u8; 32])
    }

    fn holder() -> Address {
        Address::from_pubkey([2u8; 32])
    }

    fn token() -> Token {
        Token::mint(BlockHash::zero(), "TOKEN".into(), 1_000, 2, minter())
    }

    #[test]
    fn mint_assigns_full_supply() {
        let token = token();
        assert_eq!(token.balance(&minter()), 1_000);
        assert_eq!(token.balance(&holder()), 0);
        assert_eq!(token.circulating(), token.supply());
    }

    #[test]
    fn debit_and_credit_conserve_supply() {
        let mut token = token();
        token.debit(&minter(), 300).unwrap();
        token.credit(&holder(), 300);
        assert_eq!(token.balance(&minter()), 700);
        assert_eq!(token.balance(&holder()), 300);
        assert_eq!(token.circulating(), token.supply());
    }

    #[test]
    fn debit_rejects_overdraft() {
        let mut token = token();
        assert!(token.debit(&minter(), 1_001).is_err());
        assert!(token.debit(&holder(), 1).is_err());
        assert_eq!(token.circulating(), token.supply());
    }

    #[test]
    fn drained_entry_stays_at_zero() {
        let mut token = token();
        token.debit(&minter(), 1_000).unwrap();
        token.credit(&holder(), 1_000);
        assert_eq!(token.balances().get(&minter()), Some(&0));
    }

    #[test]
    fn check_balance_matches_debit() {
        let token = token();
        assert!(token.check_balance(&minter(), 1_000).is_ok());
        assert!(token.check_balance(&minter(), 1_001).is_err());
        assert!(token.check_balance(&holder(), 0).is_ok());
    }
}

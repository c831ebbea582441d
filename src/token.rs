use crate::api::{Amount, MarketError, UserPubKey, MAX_AMOUNT};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// The token stakes are paid in. Staked funds sit in an escrow account owned
/// by the market until they are claimed.
#[async_trait]
pub trait Token {
    async fn balance_of(&self, owner: &UserPubKey) -> Result<Amount>;
    /// Amount the market may still pull from `owner`
    async fn allowance(&self, owner: &UserPubKey) -> Result<Amount>;
    async fn approve(&self, owner: &UserPubKey, amount: Amount) -> Result<()>;
    async fn mint(&self, to: &UserPubKey, amount: Amount) -> Result<()>;
    /// Moves `amount` from `from` into escrow, spending allowance
    async fn transfer_from(&self, from: &UserPubKey, amount: Amount) -> Result<()>;
    /// Moves `amount` from `from` into escrow without an allowance
    async fn deposit(&self, from: &UserPubKey, amount: Amount) -> Result<()>;
    /// Pays `amount` out of escrow to `to`
    async fn transfer(&self, to: &UserPubKey, amount: Amount) -> Result<()>;
    async fn escrow_balance(&self) -> Result<Amount>;
}

#[derive(Debug, Default)]
struct Ledger {
    balances: HashMap<UserPubKey, Amount>,
    allowances: HashMap<UserPubKey, Amount>,
    escrow: Amount,
}
impl Ledger {
    fn balance(&self, owner: &UserPubKey) -> Amount {
        self.balances.get(owner).copied().unwrap_or_default()
    }
    fn take_balance(&mut self, from: &UserPubKey, amount: Amount) -> Result<()> {
        let available = self.balance(from);
        if available < amount {
            bail!(MarketError::InsufficientBalance {
                available,
                required: amount
            });
        }
        let escrow = self
            .escrow
            .checked_add(amount)
            .filter(|escrow| *escrow <= MAX_AMOUNT)
            .ok_or(MarketError::Overflow)?;
        self.balances.insert(*from, available - amount);
        self.escrow = escrow;
        Ok(())
    }
}

/// In-process token ledger
#[derive(Debug, Default, Clone)]
pub struct TestToken {
    ledger: Arc<Mutex<Ledger>>,
}
impl TestToken {
    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>> {
        self.ledger
            .lock()
            .map_err(|_| anyhow!("Token ledger lock is poisoned"))
    }
}
#[async_trait]
impl Token for TestToken {
    async fn balance_of(&self, owner: &UserPubKey) -> Result<Amount> {
        Ok(self.ledger()?.balance(owner))
    }
    async fn allowance(&self, owner: &UserPubKey) -> Result<Amount> {
        Ok(self
            .ledger()?
            .allowances
            .get(owner)
            .copied()
            .unwrap_or_default())
    }
    async fn approve(&self, owner: &UserPubKey, amount: Amount) -> Result<()> {
        self.ledger()?.allowances.insert(*owner, amount);
        Ok(())
    }
    async fn mint(&self, to: &UserPubKey, amount: Amount) -> Result<()> {
        let mut ledger = self.ledger()?;
        let balance = ledger
            .balance(to)
            .checked_add(amount)
            .filter(|balance| *balance <= MAX_AMOUNT)
            .ok_or(MarketError::Overflow)?;
        ledger.balances.insert(*to, balance);
        Ok(())
    }
    async fn transfer_from(&self, from: &UserPubKey, amount: Amount) -> Result<()> {
        let mut ledger = self.ledger()?;
        let available = ledger.allowances.get(from).copied().unwrap_or_default();
        if available < amount {
            bail!(MarketError::InsufficientAllowance {
                available,
                required: amount
            });
        }
        ledger.take_balance(from, amount)?;
        ledger.allowances.insert(*from, available - amount);
        Ok(())
    }
    async fn deposit(&self, from: &UserPubKey, amount: Amount) -> Result<()> {
        self.ledger()?.take_balance(from, amount)
    }
    async fn transfer(&self, to: &UserPubKey, amount: Amount) -> Result<()> {
        let mut ledger = self.ledger()?;
        if ledger.escrow < amount {
            bail!(
                "Escrow holds {} but a transfer of {} was requested",
                ledger.escrow,
                amount
            );
        }
        let balance = ledger
            .balance(to)
            .checked_add(amount)
            .filter(|balance| *balance <= MAX_AMOUNT)
            .ok_or(MarketError::Overflow)?;
        ledger.escrow -= amount;
        ledger.balances.insert(*to, balance);
        Ok(())
    }
    async fn escrow_balance(&self) -> Result<Amount> {
        Ok(self.ledger()?.escrow)
    }
}

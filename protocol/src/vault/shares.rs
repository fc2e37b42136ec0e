//! Share balances of a root vault.
//!
//! `total` always equals the sum of all balances; every mutation goes
//! through [`ShareLedger::mint`], [`ShareLedger::burn`] or
//! [`ShareLedger::transfer`], which keep it that way.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Address, Amount};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLedger {
    total: Amount,
    balances: HashMap<Address, Amount>,
}

impl ShareLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Amount {
        self.total
    }

    pub fn balance_of(&self, holder: Address) -> Amount {
        self.balances.get(&holder).copied().unwrap_or(0)
    }

    /// Holders with a non-zero balance.
    pub fn holders(&self) -> Vec<(Address, Amount)> {
        let mut holders: Vec<_> = self
            .balances
            .iter()
            .filter(|(_, b)| **b > 0)
            .map(|(a, b)| (*a, *b))
            .collect();
        holders.sort();
        holders
    }

    pub fn mint(&mut self, to: Address, amount: Amount) -> ProtocolResult<()> {
        if to.is_zero() {
            return Err(ProtocolError::AddressZero("share recipient"));
        }
        let total = self
            .total
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow("share supply"))?;
        let balance = self.balance_of(to) + amount;
        self.total = total;
        self.balances.insert(to, balance);
        Ok(())
    }

    pub fn burn(&mut self, from: Address, amount: Amount) -> ProtocolResult<()> {
        let balance = self.balance_of(from);
        if balance < amount {
            return Err(ProtocolError::LimitOverflow {
                what: "shares burned",
                requested: amount,
                limit: balance,
            });
        }
        self.total -= amount;
        if balance == amount {
            self.balances.remove(&from);
        } else {
            self.balances.insert(from, balance - amount);
        }
        Ok(())
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> ProtocolResult<()> {
        if to.is_zero() {
            return Err(ProtocolError::AddressZero("share recipient"));
        }
        self.burn(from, amount)?;
        self.mint(to, amount)
    }
}

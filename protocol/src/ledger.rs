//! # Host Asset Ledger
//!
//! KEEL does not issue the assets it manages. Balances live on a host ledger
//! and the protocol only reads and moves them through [`AssetLedger`]. A
//! vault's holdings are whatever the ledger says its address owns.
//!
//! [`MemoryLedger`] is the in-process implementation: one `DashMap` entry per
//! `(asset, holder)` pair, so unrelated transfers never contend.

use dashmap::DashMap;
use tracing::trace;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Address, Amount, AssetId};

/// Fungible balances keyed by asset and holder.
pub trait AssetLedger: Send + Sync {
    /// Current balance of `holder` in `asset`.
    fn balance_of(&self, asset: AssetId, holder: Address) -> Amount;

    /// Moves `amount` from `from` to `to`. All or nothing.
    fn transfer(&self, asset: AssetId, from: Address, to: Address, amount: Amount)
        -> ProtocolResult<()>;

    /// Creates `amount` new units at `to`.
    fn mint(&self, asset: AssetId, to: Address, amount: Amount) -> ProtocolResult<()>;

    /// Destroys `amount` units held by `from`.
    fn burn(&self, asset: AssetId, from: Address, amount: Amount) -> ProtocolResult<()>;

    /// Total units of `asset` in existence.
    fn total_supply(&self, asset: AssetId) -> Amount;
}

/// In-memory [`AssetLedger`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    balances: DashMap<(AssetId, Address), Amount>,
    supplies: DashMap<AssetId, Amount>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn debit(&self, asset: AssetId, holder: Address, amount: Amount) -> ProtocolResult<()> {
        let mut entry = self.balances.entry((asset, holder)).or_insert(0);
        if *entry < amount {
            return Err(ProtocolError::InsufficientBalance {
                asset,
                holder,
                available: *entry,
                requested: amount,
            });
        }
        *entry -= amount;
        Ok(())
    }

    fn credit(&self, asset: AssetId, holder: Address, amount: Amount) -> ProtocolResult<()> {
        let mut entry = self.balances.entry((asset, holder)).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow("ledger credit"))?;
        Ok(())
    }
}

impl AssetLedger for MemoryLedger {
    fn balance_of(&self, asset: AssetId, holder: Address) -> Amount {
        self.balances.get(&(asset, holder)).map(|b| *b).unwrap_or(0)
    }

    fn transfer(
        &self,
        asset: AssetId,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> ProtocolResult<()> {
        if amount == 0 || from == to {
            return Ok(());
        }
        if to.is_zero() {
            return Err(ProtocolError::AddressZero("transfer recipient"));
        }
        // Overflow on the credit side is checked up front so a failed
        // credit never follows a successful debit.
        self.balance_of(asset, to)
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow("ledger credit"))?;
        self.debit(asset, from, amount)?;
        self.credit(asset, to, amount)?;
        trace!(%asset, %from, %to, amount, "ledger transfer");
        Ok(())
    }

    fn mint(&self, asset: AssetId, to: Address, amount: Amount) -> ProtocolResult<()> {
        if to.is_zero() {
            return Err(ProtocolError::AddressZero("mint recipient"));
        }
        let mut supply = self.supplies.entry(asset).or_insert(0);
        let new_supply = supply
            .checked_add(amount)
            .ok_or(ProtocolError::Overflow("ledger supply"))?;
        self.credit(asset, to, amount)?;
        *supply = new_supply;
        Ok(())
    }

    fn burn(&self, asset: AssetId, from: Address, amount: Amount) -> ProtocolResult<()> {
        self.debit(asset, from, amount)?;
        let mut supply = self.supplies.entry(asset).or_insert(0);
        *supply = supply.saturating_sub(amount);
        Ok(())
    }

    fn total_supply(&self, asset: AssetId) -> Amount {
        self.supplies.get(&asset).map(|s| *s).unwrap_or(0)
    }
}

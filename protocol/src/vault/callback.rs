//! # Depositor Callbacks
//!
//! A root vault's strategy can configure hooks that run after every deposit
//! or withdrawal (to rebalance, restake, notify...). Callbacks are looked up
//! by address in the [`CallbackRegistry`]. They run after the operation has
//! been fully applied, and a failing or panicking callback never undoes it:
//! the failure is logged, counted and journaled, and the caller still gets
//! their shares or assets.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Address, Amount, VaultId};

/// What a callback is told about the operation that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackContext {
    pub vault_id: VaultId,
    /// Depositor, or withdrawal recipient.
    pub account: Address,
    /// Shares minted or burned.
    pub shares: Amount,
    /// Asset amounts moved, in the root vault's asset order.
    pub amounts: Vec<Amount>,
}

/// Hooks a strategy can attach to a root vault.
pub trait LpCallback: Send + Sync {
    fn deposit_callback(&self, ctx: &CallbackContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    fn withdraw_callback(&self, ctx: &CallbackContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallbackKind {
    Deposit,
    Withdraw,
}

/// Address → callback implementation.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: DashMap<Address, Arc<dyn LpCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `callback` at `address`. Addresses are never reused.
    pub fn register(&self, address: Address, callback: Arc<dyn LpCallback>) -> ProtocolResult<()> {
        if address.is_zero() {
            return Err(ProtocolError::AddressZero("callback"));
        }
        if self.callbacks.contains_key(&address) {
            return Err(ProtocolError::Duplicate(format!("callback at {address}")));
        }
        self.callbacks.insert(address, callback);
        Ok(())
    }

    pub fn contains(&self, address: Address) -> bool {
        self.callbacks.contains_key(&address)
    }

    /// Runs the callback at `address`, turning errors and panics into a
    /// failure description.
    pub(crate) fn invoke(
        &self,
        address: Address,
        kind: CallbackKind,
        ctx: &CallbackContext,
    ) -> Result<(), String> {
        let callback = self
            .callbacks
            .get(&address)
            .map(|c| c.value().clone())
            .ok_or_else(|| format!("no callback registered at {address}"))?;
        let outcome = catch_unwind(AssertUnwindSafe(|| match kind {
            CallbackKind::Deposit => callback.deposit_callback(ctx),
            CallbackKind::Withdraw => callback.withdraw_callback(ctx),
        }));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(_) => Err("callback panicked".to_string()),
        }
    }
}

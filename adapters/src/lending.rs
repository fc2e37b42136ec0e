//! # Lending Vault
//!
//! Custody in a money market. The vault supplies everything pushed into it
//! to a [`LendingPool`] and owns an interest-bearing claim on it. The claim
//! grows with the pool's liquidity index; withdrawing is limited by what
//! borrowers have left in the pool, which is where partial fills come from.
//!
//! Claims are stored scaled by the index at supply time (`scaled =
//! amount · RAY / index`), so accruing interest is a single index update.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use keel_protocol::context::ProtocolContext;
use keel_protocol::error::{ProtocolError, ProtocolResult};
use keel_protocol::governance::{VaultFamily, VaultGovernance};
use keel_protocol::math::{mul_div, mul_div_round_up};
use keel_protocol::registry::BoundVault;
use keel_protocol::types::{Address, Amount, AssetId, VaultId, VaultKind};
use keel_protocol::vault::{IntegrationCore, IntegrationVault};

/// Fixed-point unit of the liquidity index.
pub const RAY: u128 = 1_000_000_000_000_000_000_000_000_000;

const BPS: u128 = 10_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LendingError {
    /// The pool has no reserve for this asset.
    #[error("no reserve for asset {0}")]
    UnknownReserve(AssetId),

    /// Borrowers hold too much of the reserve.
    #[error("insufficient liquidity in {asset}: {available} available, {requested} requested")]
    InsufficientLiquidity {
        asset: AssetId,
        available: Amount,
        requested: Amount,
    },

    /// Repaying more than is owed.
    #[error("repayment of {requested} exceeds debt of {owed}")]
    OverRepayment { owed: Amount, requested: Amount },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<LendingError> for ProtocolError {
    fn from(e: LendingError) -> Self {
        match e {
            LendingError::Protocol(inner) => inner,
            other => ProtocolError::invalid_value(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserve {
    /// Value of one scaled unit, in RAY.
    pub liquidity_index: u128,
    pub scaled_supply: u128,
    pub borrowed: Amount,
}

impl Default for Reserve {
    fn default() -> Self {
        Self {
            liquidity_index: RAY,
            scaled_supply: 0,
            borrowed: 0,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    reserves: HashMap<AssetId, Reserve>,
    scaled: HashMap<(AssetId, Address), u128>,
    debts: HashMap<(AssetId, Address), Amount>,
}

/// An in-process money market. Free liquidity is the pool's own ledger
/// balance.
pub struct LendingPool {
    address: Address,
    ctx: Arc<ProtocolContext>,
    state: Mutex<PoolState>,
}

impl LendingPool {
    pub fn new(ctx: Arc<ProtocolContext>, address: Address) -> ProtocolResult<Self> {
        if address.is_zero() {
            return Err(ProtocolError::AddressZero("lending pool"));
        }
        Ok(Self {
            address,
            ctx,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Opens a reserve for `asset`. Idempotent.
    pub fn list_reserve(&self, asset: AssetId) {
        self.state.lock().reserves.entry(asset).or_default();
    }

    pub fn reserve(&self, asset: AssetId) -> Option<Reserve> {
        self.state.lock().reserves.get(&asset).cloned()
    }

    /// Free liquidity of `asset`.
    pub fn available_liquidity(&self, asset: AssetId) -> Amount {
        self.ctx.ledger().balance_of(asset, self.address)
    }

    /// Current claim of `account` on `asset`, interest included.
    pub fn balance_of(&self, asset: AssetId, account: Address) -> Result<Amount, LendingError> {
        let state = self.state.lock();
        let reserve = state
            .reserves
            .get(&asset)
            .ok_or(LendingError::UnknownReserve(asset))?;
        let scaled = state.scaled.get(&(asset, account)).copied().unwrap_or(0);
        Ok(mul_div(scaled, reserve.liquidity_index, RAY)?)
    }

    pub fn debt_of(&self, asset: AssetId, account: Address) -> Amount {
        self.state
            .lock()
            .debts
            .get(&(asset, account))
            .copied()
            .unwrap_or(0)
    }

    /// Moves `amount` from `from` into the pool, credited to `on_behalf_of`.
    pub fn supply(
        &self,
        asset: AssetId,
        from: Address,
        on_behalf_of: Address,
        amount: Amount,
    ) -> Result<(), LendingError> {
        let mut state = self.state.lock();
        let index = state
            .reserves
            .get(&asset)
            .ok_or(LendingError::UnknownReserve(asset))?
            .liquidity_index;
        let scaled = mul_div(amount, RAY, index)?;
        self.ctx.ledger().transfer(asset, from, self.address, amount)?;
        *state.scaled.entry((asset, on_behalf_of)).or_insert(0) += scaled;
        if let Some(reserve) = state.reserves.get_mut(&asset) {
            reserve.scaled_supply += scaled;
        }
        debug!(%asset, %on_behalf_of, amount, "supplied");
        Ok(())
    }

    /// Withdraws up to `amount` of `account`'s claim to `to`, limited by the
    /// claim and by free liquidity. Returns what was sent.
    pub fn withdraw(
        &self,
        asset: AssetId,
        account: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Amount, LendingError> {
        let mut state = self.state.lock();
        let index = state
            .reserves
            .get(&asset)
            .ok_or(LendingError::UnknownReserve(asset))?
            .liquidity_index;
        let scaled = state.scaled.get(&(asset, account)).copied().unwrap_or(0);
        let claim = mul_div(scaled, index, RAY)?;
        let sent = amount.min(claim).min(self.available_liquidity(asset));
        if sent == 0 {
            return Ok(0);
        }
        let burned = if sent == claim {
            scaled
        } else {
            mul_div_round_up(sent, RAY, index)?.min(scaled)
        };
        self.ctx.ledger().transfer(asset, self.address, to, sent)?;
        if let Some(balance) = state.scaled.get_mut(&(asset, account)) {
            *balance -= burned;
        }
        if let Some(reserve) = state.reserves.get_mut(&asset) {
            reserve.scaled_supply -= burned;
        }
        debug!(%asset, %account, requested = amount, sent, "withdrawn");
        Ok(sent)
    }

    /// Lends `amount` of free liquidity to `borrower`.
    pub fn borrow(&self, asset: AssetId, borrower: Address, amount: Amount) -> Result<(), LendingError> {
        let mut state = self.state.lock();
        let available = self.available_liquidity(asset);
        let reserve = state
            .reserves
            .get_mut(&asset)
            .ok_or(LendingError::UnknownReserve(asset))?;
        if amount > available {
            return Err(LendingError::InsufficientLiquidity {
                asset,
                available,
                requested: amount,
            });
        }
        self.ctx.ledger().transfer(asset, self.address, borrower, amount)?;
        reserve.borrowed += amount;
        *state.debts.entry((asset, borrower)).or_insert(0) += amount;
        Ok(())
    }

    pub fn repay(&self, asset: AssetId, borrower: Address, amount: Amount) -> Result<(), LendingError> {
        let mut state = self.state.lock();
        let owed = state.debts.get(&(asset, borrower)).copied().unwrap_or(0);
        if amount > owed {
            return Err(LendingError::OverRepayment {
                owed,
                requested: amount,
            });
        }
        self.ctx.ledger().transfer(asset, borrower, self.address, amount)?;
        state.debts.insert((asset, borrower), owed - amount);
        if let Some(reserve) = state.reserves.get_mut(&asset) {
            reserve.borrowed -= amount;
        }
        Ok(())
    }

    /// Grows the index of `asset` by `rate_bps` and mints the interest into
    /// the pool so every claim stays backed. Returns the interest paid.
    pub fn accrue_interest(&self, asset: AssetId, rate_bps: u128) -> Result<Amount, LendingError> {
        let mut state = self.state.lock();
        let reserve = state
            .reserves
            .get_mut(&asset)
            .ok_or(LendingError::UnknownReserve(asset))?;
        let before = mul_div(reserve.scaled_supply, reserve.liquidity_index, RAY)?;
        reserve.liquidity_index = mul_div(reserve.liquidity_index, BPS + rate_bps, BPS)?;
        let after = mul_div(reserve.scaled_supply, reserve.liquidity_index, RAY)?;
        let interest = after - before;
        self.ctx.ledger().mint(asset, self.address, interest)?;
        info!(%asset, rate_bps, interest, index = %reserve.liquidity_index, "interest accrued");
        Ok(interest)
    }
}

// ---------------------------------------------------------------------------
// Family
// ---------------------------------------------------------------------------

pub type LendingGovernance = VaultGovernance<LendingFamily>;

pub struct LendingFamily;

/// Family-wide, timelocked: which pool lending vaults supply to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LendingDelayedProtocolParams {
    pub lending_pool: Address,
}

impl VaultFamily for LendingFamily {
    const KIND: VaultKind = VaultKind::Lending;
    const NAME: &'static str = "LendingVaultGovernance";
    const VERSION: &'static str = "1.0.0";

    type DelayedStrategyParams = ();
    type StrategyParams = ();
    type DelayedProtocolParams = LendingDelayedProtocolParams;
    type DelayedProtocolPerVaultParams = ();
    type OperatorParams = ();

    fn validate_delayed_protocol_params(params: &LendingDelayedProtocolParams) -> ProtocolResult<()> {
        if params.lending_pool.is_zero() {
            return Err(ProtocolError::AddressZero("lending pool"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

pub struct LendingVault {
    core: IntegrationCore,
    pool: Arc<LendingPool>,
}

impl LendingVault {
    /// Creates a lending vault over `assets` supplying to `pool`, which must
    /// be the family's configured pool and list every asset.
    pub fn create(
        governance: &LendingGovernance,
        pool: Arc<LendingPool>,
        sender: Address,
        assets: Vec<AssetId>,
        owner: Address,
    ) -> ProtocolResult<Arc<LendingVault>> {
        let configured = governance.delayed_protocol_params().lending_pool;
        if pool.address() != configured {
            return Err(ProtocolError::invalid_value(format!(
                "pool {} is not the configured lending pool {configured}",
                pool.address()
            )));
        }
        if let Some(asset) = assets.iter().find(|a| pool.reserve(**a).is_none()) {
            return Err(LendingError::UnknownReserve(*asset).into());
        }
        let ctx = governance.ctx().clone();
        governance.create_vault(sender, assets, owner, |record| {
            let vault = Arc::new(LendingVault {
                core: IntegrationCore::new(ctx, record),
                pool,
            });
            Ok((vault.clone(), BoundVault::Integration(vault)))
        })
    }

    pub fn pool(&self) -> &Arc<LendingPool> {
        &self.pool
    }
}

impl IntegrationVault for LendingVault {
    fn vault_id(&self) -> VaultId {
        self.core.id()
    }

    fn kind(&self) -> VaultKind {
        self.core.kind()
    }

    fn assets(&self) -> &[AssetId] {
        self.core.assets()
    }

    fn valuate(&self) -> ProtocolResult<Vec<(AssetId, Amount)>> {
        self.core
            .assets()
            .iter()
            .map(|asset| -> ProtocolResult<(AssetId, Amount)> {
                Ok((*asset, self.pool.balance_of(*asset, self.core.address())?))
            })
            .collect()
    }

    fn push(
        &self,
        sender: Address,
        from: Address,
        assets: &[AssetId],
        amounts: &[Amount],
        _options: &[u8],
    ) -> ProtocolResult<Vec<Amount>> {
        self.core.ensure_authorized(sender)?;
        self.core.resolve(assets, amounts)?;
        for (asset, amount) in assets.iter().zip(amounts) {
            if *amount > 0 {
                self.pool.supply(*asset, from, self.core.address(), *amount)?;
            }
        }
        Ok(amounts.to_vec())
    }

    fn pull(
        &self,
        sender: Address,
        to: Address,
        assets: &[AssetId],
        amounts: &[Amount],
        _options: &[u8],
    ) -> ProtocolResult<Vec<Amount>> {
        self.core.ensure_authorized(sender)?;
        self.core.resolve(assets, amounts)?;
        let actual = assets
            .iter()
            .zip(amounts)
            .map(|(asset, amount)| self.pool.withdraw(*asset, self.core.address(), to, *amount))
            .collect::<Result<Vec<_>, _>>()?;
        self.core.note_fill("pull", amounts, &actual);
        Ok(actual)
    }
}

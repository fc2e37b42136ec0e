//! # Root Vault
//!
//! The pooled vault users actually touch. It issues shares against a fixed,
//! ordered list of custodian sub-vaults and keeps them proportional:
//!
//! - **deposit** — fees are accrued first, then the depositor is priced
//!   against current value, pays only what the shares are worth, and the
//!   assets are spread over the sub-vaults pro rata to what they already
//!   hold.
//! - **withdraw** — fees first again, then every sub-vault is asked for its
//!   slice. Custodians may under-deliver; the withdrawer gets what actually
//!   arrived, subject to their per-asset minimums.
//!
//! Anything that cannot be placed in a sub-vault (rounding dust, a refused
//! push) stays idle in the root vault's own ledger balance and still counts
//! toward its value.
//!
//! One mutex guards all share accounting. Callbacks run after it is
//! released.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::FIRST_DEPOSIT_LIMIT;
use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::ProtocolEvent;
use crate::math::{add, mul_div, mul_div_round_up};
use crate::registry::{BoundVault, VaultRegistry};
use crate::types::{Address, Amount, AssetId, CapabilitySet, Timestamp, VaultId};
use crate::vault::callback::{CallbackContext, CallbackKind};
use crate::vault::family::{RootDelayedStrategyParams, RootVaultGovernance};
use crate::vault::fees::{compute_fees, value_per_share, FeeCharge, FeeKind, FeeSchedule};
use crate::vault::shares::ShareLedger;
use crate::vault::IntegrationVault;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A custodian under a root vault.
#[derive(Clone)]
pub struct Subvault {
    pub id: VaultId,
    pub vault: Arc<dyn IntegrationVault>,
}

#[derive(Debug, Clone, Default)]
struct RootVaultState {
    shares: ShareLedger,
    allowlist: BTreeSet<Address>,
    last_fee_charge: Timestamp,
    high_water_mark: Vec<u128>,
}

/// Where the vault's value sits, per asset (root asset order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holdings {
    /// Ledger balance of the root vault itself.
    pub idle: Vec<Amount>,
    /// One row per sub-vault, in sub-vault order.
    pub subvaults: Vec<Vec<Amount>>,
}

impl Holdings {
    /// Idle plus everything in sub-vaults.
    pub fn total(&self) -> ProtocolResult<Vec<Amount>> {
        let mut total = self.idle.clone();
        for row in &self.subvaults {
            for (t, h) in total.iter_mut().zip(row) {
                *t = add(*t, *h, "tvl")?;
            }
        }
        Ok(total)
    }

    fn held_by_subvaults(&self, asset: usize) -> Amount {
        self.subvaults
            .iter()
            .fold(0u128, |acc, row| acc.saturating_add(row[asset]))
    }
}

/// Shares a deposit would mint and the amounts it would take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositQuote {
    pub shares: Amount,
    pub amounts: Vec<Amount>,
}

/// Prices a deposit of `amounts` against `tvl` and `supply`.
///
/// An empty vault mints the largest deposited amount as shares. Otherwise
/// the depositor gets the smallest `amount · supply / tvl` over assets the
/// vault holds, and pays `ceil(tvl · shares / supply)` of each.
pub fn quote_deposit(amounts: &[Amount], tvl: &[Amount], supply: Amount) -> ProtocolResult<DepositQuote> {
    if supply == 0 {
        return Ok(DepositQuote {
            shares: amounts.iter().copied().max().unwrap_or(0),
            amounts: amounts.to_vec(),
        });
    }
    let mut shares: Option<Amount> = None;
    for (amount, value) in amounts.iter().zip(tvl) {
        if *value == 0 {
            continue;
        }
        let s = mul_div(*amount, supply, *value)?;
        shares = Some(shares.map_or(s, |current| current.min(s)));
    }
    let shares = shares.unwrap_or(0);
    let amounts = amounts
        .iter()
        .zip(tvl)
        .map(|(amount, value)| {
            if *value == 0 {
                Ok(0)
            } else {
                Ok(mul_div_round_up(*value, shares, supply)?.min(*amount))
            }
        })
        .collect::<ProtocolResult<Vec<_>>>()?;
    Ok(DepositQuote { shares, amounts })
}

// ---------------------------------------------------------------------------
// RootVault
// ---------------------------------------------------------------------------

pub struct RootVault {
    id: VaultId,
    address: Address,
    assets: Vec<AssetId>,
    subvaults: Vec<Subvault>,
    governance: Arc<RootVaultGovernance>,
    ctx: Arc<ProtocolContext>,
    state: Mutex<RootVaultState>,
}

impl RootVault {
    /// Creates a root vault over `subvault_ids`.
    ///
    /// The sub-vault handles move from `sender` to the new root vault, the
    /// root handle goes to `owner`, and `strategy` is approved on it.
    pub fn create(
        governance: &Arc<RootVaultGovernance>,
        sender: Address,
        assets: Vec<AssetId>,
        strategy: Address,
        subvault_ids: &[VaultId],
        owner: Address,
    ) -> ProtocolResult<Arc<RootVault>> {
        governance.check_create(sender, &assets, owner)?;
        if strategy.is_zero() {
            return Err(ProtocolError::AddressZero("strategy"));
        }
        let ctx = governance.ctx().clone();
        let subvaults = Self::resolve_subvaults(&ctx, sender, &assets, subvault_ids)?;

        governance.create_vault(sender, assets, owner, |record| {
            if subvaults.iter().any(|s| s.id == record.id) {
                return Err(ProtocolError::Duplicate(format!("subvault {}", record.id)));
            }
            let address = Address::for_vault(record.id);
            let registry = ctx.registry();
            let mut moved = Vec::with_capacity(subvaults.len());
            for sub in &subvaults {
                let taken = registry
                    .owner_of(sub.id)
                    .and_then(|previous| registry.transfer(sender, sub.id, address).map(|()| previous));
                match taken {
                    Ok(previous) => moved.push((sub.id, previous)),
                    Err(e) => {
                        Self::return_handles(registry, address, &moved);
                        return Err(e);
                    }
                }
            }
            if let Err(e) = registry.registrar_approve(governance.address(), record.id, strategy) {
                Self::return_handles(registry, address, &moved);
                return Err(e);
            }
            let vault = Arc::new(RootVault {
                id: record.id,
                address,
                assets: record.assets.clone(),
                subvaults: subvaults.clone(),
                governance: governance.clone(),
                ctx: ctx.clone(),
                state: Mutex::new(RootVaultState {
                    last_fee_charge: ctx.now(),
                    ..RootVaultState::default()
                }),
            });
            info!(
                vault_id = record.id,
                subvaults = ?subvaults.iter().map(|s| s.id).collect::<Vec<_>>(),
                %strategy,
                "root vault initialized"
            );
            Ok((vault.clone(), BoundVault::Root(vault)))
        })
    }

    /// Gives sub-vault handles taken by an unfinished creation back to their
    /// previous owners.
    fn return_handles(registry: &VaultRegistry, from: Address, moved: &[(VaultId, Address)]) {
        for (id, previous) in moved.iter().rev() {
            if let Err(e) = registry.transfer(from, *id, *previous) {
                error!(vault_id = *id, error = %e, "subvault handle not returned");
            }
        }
    }

    fn resolve_subvaults(
        ctx: &ProtocolContext,
        sender: Address,
        assets: &[AssetId],
        ids: &[VaultId],
    ) -> ProtocolResult<Vec<Subvault>> {
        if ids.is_empty() {
            return Err(ProtocolError::EmptyList("subvaults"));
        }
        let registry = ctx.registry();
        let own_id = registry.next_id();
        let mut seen = HashSet::new();
        let mut subvaults = Vec::with_capacity(ids.len());
        for &id in ids {
            if id == 0 {
                return Err(ProtocolError::ValueZero("subvault id"));
            }
            if id == own_id || !seen.insert(id) {
                return Err(ProtocolError::Duplicate(format!("subvault {id}")));
            }
            let record = registry.record(id)?;
            if record.locked {
                return Err(ProtocolError::Locked(id));
            }
            if !registry.is_owner_or_approved(id, sender) {
                return Err(ProtocolError::forbidden(format!(
                    "{sender} does not control subvault {id}"
                )));
            }
            if !registry.supports_vault_interface(id, CapabilitySet::INTEGRATION) {
                return Err(ProtocolError::InvalidInterface {
                    vault_id: id,
                    reason: "valuate, pull and push are required".into(),
                });
            }
            if record.assets != assets {
                return Err(ProtocolError::InvalidInterface {
                    vault_id: id,
                    reason: "asset set differs from the root vault".into(),
                });
            }
            let vault = registry.integration_vault(id)?;
            subvaults.push(Subvault { id, vault });
        }
        Ok(subvaults)
    }

    // ----- accessors -----------------------------------------------------

    pub fn id(&self) -> VaultId {
        self.id
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn subvault_ids(&self) -> Vec<VaultId> {
        self.subvaults.iter().map(|s| s.id).collect()
    }

    pub fn subvaults(&self) -> &[Subvault] {
        &self.subvaults
    }

    pub fn governance(&self) -> &Arc<RootVaultGovernance> {
        &self.governance
    }

    pub fn total_shares(&self) -> Amount {
        self.state.lock().shares.total()
    }

    pub fn balance_of(&self, holder: Address) -> Amount {
        self.state.lock().shares.balance_of(holder)
    }

    /// Non-zero share holders, sorted by address.
    pub fn share_holders(&self) -> Vec<(Address, Amount)> {
        self.state.lock().shares.holders()
    }

    pub fn last_fee_charge(&self) -> Timestamp {
        self.state.lock().last_fee_charge
    }

    /// Per-asset value-per-share mark (1e18 scale). Empty until first set.
    pub fn high_water_mark(&self) -> Vec<u128> {
        self.state.lock().high_water_mark.clone()
    }

    pub fn depositors_allowlist(&self) -> Vec<Address> {
        self.state.lock().allowlist.iter().copied().collect()
    }

    /// Current holdings, idle and per sub-vault.
    pub fn holdings(&self) -> ProtocolResult<Holdings> {
        let ledger = self.ctx.ledger();
        let idle = self
            .assets
            .iter()
            .map(|asset| ledger.balance_of(*asset, self.address))
            .collect();
        let mut rows = Vec::with_capacity(self.subvaults.len());
        for sub in &self.subvaults {
            let mut row = vec![0; self.assets.len()];
            for (asset, amount) in sub.vault.valuate()? {
                let j = self.assets.binary_search(&asset).map_err(|_| {
                    ProtocolError::InvalidInterface {
                        vault_id: sub.id,
                        reason: format!("valuation reports unknown asset {asset}"),
                    }
                })?;
                row[j] = add(row[j], amount, "subvault valuation")?;
            }
            rows.push(row);
        }
        Ok(Holdings {
            idle,
            subvaults: rows,
        })
    }

    /// Total value per asset.
    pub fn tvl(&self) -> ProtocolResult<Vec<Amount>> {
        self.holdings()?.total()
    }

    // ----- access checks -------------------------------------------------

    fn ensure_strategy(&self, sender: Address) -> ProtocolResult<()> {
        if self.governance.is_strategy(sender, self.id) {
            Ok(())
        } else {
            Err(ProtocolError::forbidden(format!(
                "{sender} is neither admin nor strategy of vault {}",
                self.id
            )))
        }
    }

    fn check_options(&self, options: &[Bytes], allow_empty: bool) -> ProtocolResult<()> {
        let expected = self.subvaults.len();
        if options.len() == expected || (allow_empty && options.is_empty()) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidLength {
                expected,
                actual: options.len(),
            })
        }
    }

    fn check_asset_len(&self, len: usize) -> ProtocolResult<()> {
        if len == self.assets.len() {
            Ok(())
        } else {
            Err(ProtocolError::InvalidLength {
                expected: self.assets.len(),
                actual: len,
            })
        }
    }

    // ----- fees ----------------------------------------------------------

    fn fee_schedule(&self, params: &RootDelayedStrategyParams) -> ProtocolResult<FeeSchedule> {
        let protocol = self.governance.delayed_protocol_params();
        let per_vault = self.governance.delayed_protocol_per_vault_params(self.id)?;
        Ok(FeeSchedule {
            management_fee: params.management_fee,
            performance_fee: params.performance_fee,
            protocol_fee: per_vault.protocol_fee,
            charge_delay: protocol.management_fee_charge_delay,
            strategy_treasury: params.strategy_treasury,
            performance_treasury: params.strategy_performance_treasury,
            protocol_treasury: self.ctx.governance().protocol_treasury(),
        })
    }

    fn preview_fees(
        &self,
        state: &RootVaultState,
        params: &RootDelayedStrategyParams,
        now: Timestamp,
        tvl: &[Amount],
    ) -> ProtocolResult<FeeCharge> {
        compute_fees(
            &self.fee_schedule(params)?,
            state.last_fee_charge,
            now,
            state.shares.total(),
            tvl,
            &state.high_water_mark,
        )
    }

    fn apply_fees(&self, state: &mut RootVaultState, charge: FeeCharge) -> ProtocolResult<()> {
        if let Some(at) = charge.charged_at {
            state.last_fee_charge = at;
        }
        if let Some(mark) = charge.high_water_mark {
            state.high_water_mark = mark;
        }
        for mint in charge.mints {
            state.shares.mint(mint.treasury, mint.shares)?;
            debug!(vault_id = self.id, kind = ?mint.kind, shares = mint.shares, "fee shares minted");
            self.ctx.metrics().fee_charges_total.inc();
            let (vault_id, treasury, fee, shares) = (self.id, mint.treasury, mint.fee, mint.shares);
            let event = match mint.kind {
                FeeKind::Management => ProtocolEvent::ManagementFeesCharged {
                    vault_id,
                    treasury,
                    fee,
                    shares,
                },
                FeeKind::Protocol => ProtocolEvent::ProtocolFeesCharged {
                    vault_id,
                    treasury,
                    fee,
                    shares,
                },
                FeeKind::Performance => ProtocolEvent::PerformanceFeesCharged {
                    vault_id,
                    treasury,
                    fee,
                    shares,
                },
            };
            self.ctx.events().emit(self.ctx.now(), event);
        }
        Ok(())
    }

    // ----- custodian plumbing --------------------------------------------

    /// Pushes `amounts` (already at the root address) into sub-vaults pro
    /// rata to their holdings. Whatever is not accepted stays idle.
    fn distribute(&self, holdings: &Holdings, amounts: &[Amount], options: &[Bytes]) {
        let mut plan = vec![vec![0u128; self.assets.len()]; self.subvaults.len()];
        for (j, amount) in amounts.iter().enumerate() {
            if *amount == 0 {
                continue;
            }
            let held = holdings.held_by_subvaults(j);
            if held == 0 {
                plan[0][j] = *amount;
                continue;
            }
            for (i, row) in holdings.subvaults.iter().enumerate() {
                plan[i][j] = mul_div(*amount, row[j], held).unwrap_or(0);
            }
        }

        for (i, (sub, request)) in self.subvaults.iter().zip(&plan).enumerate() {
            if request.iter().all(|a| *a == 0) {
                continue;
            }
            let opts: &[u8] = options.get(i).map(|b| b.as_ref()).unwrap_or(&[]);
            match sub
                .vault
                .push(self.address, self.address, &self.assets, request, opts)
            {
                Ok(accepted) => {
                    if accepted.iter().zip(request).any(|(a, r)| a < r) {
                        self.ctx.metrics().partial_fills_total.inc();
                        debug!(vault_id = self.id, subvault = sub.id, ?request, ?accepted, "push partially accepted");
                    }
                }
                Err(e) => {
                    warn!(vault_id = self.id, subvault = sub.id, error = %e, "push failed, funds stay idle");
                }
            }
        }
    }

    /// Moves `amounts` from `from` to the root address, undoing earlier legs
    /// if a later one fails.
    fn collect(&self, from: Address, amounts: &[Amount]) -> ProtocolResult<()> {
        let ledger = self.ctx.ledger();
        for (j, (asset, amount)) in self.assets.iter().zip(amounts).enumerate() {
            if let Err(e) = ledger.transfer(*asset, from, self.address, *amount) {
                for (done_asset, done_amount) in self.assets.iter().zip(amounts).take(j) {
                    if let Err(undo) = ledger.transfer(*done_asset, self.address, from, *done_amount) {
                        warn!(vault_id = self.id, error = %undo, "failed to return partial deposit");
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn run_callback(&self, callback: Address, kind: CallbackKind, ctx: CallbackContext) {
        let Err(reason) = self.ctx.callbacks().invoke(callback, kind, &ctx) else {
            return;
        };
        warn!(vault_id = self.id, %callback, ?kind, %reason, "callback failed");
        self.ctx.metrics().callback_failures_total.inc();
        let event = match kind {
            CallbackKind::Deposit => ProtocolEvent::DepositCallbackFailed {
                vault_id: self.id,
                callback,
                reason,
            },
            CallbackKind::Withdraw => ProtocolEvent::WithdrawCallbackFailed {
                vault_id: self.id,
                callback,
                reason,
            },
        };
        self.ctx.events().emit(self.ctx.now(), event);
    }

    // ----- deposit / withdraw --------------------------------------------

    /// Deposits up to `amounts` (root asset order) and mints shares to
    /// `sender`. Returns the shares minted.
    ///
    /// `options` is either empty or holds one opaque blob per sub-vault.
    pub fn deposit(
        &self,
        sender: Address,
        amounts: &[Amount],
        min_shares: Amount,
        options: &[Bytes],
    ) -> ProtocolResult<Amount> {
        let _timer = self.ctx.metrics().root_operation_seconds.start_timer();
        if self.governance.operator_params().disable_deposit {
            return Err(ProtocolError::forbidden("deposits are disabled"));
        }
        self.check_asset_len(amounts.len())?;
        self.check_options(options, true)?;
        let params = self.governance.delayed_strategy_params(self.id)?;
        let limits = self.governance.strategy_params(self.id)?;

        let mut state = self.state.lock();
        let restricted = params.private_vault || !state.allowlist.is_empty();
        if restricted
            && !state.allowlist.contains(&sender)
            && !self.ctx.governance().is_admin(sender)
        {
            return Err(ProtocolError::forbidden(format!(
                "{sender} is not on the depositor allow-list"
            )));
        }
        if state.shares.total() == 0 {
            if let Some(small) = amounts.iter().find(|a| **a <= FIRST_DEPOSIT_LIMIT) {
                return Err(ProtocolError::LimitUnderflow {
                    what: "first deposit amount",
                    actual: *small,
                    minimum: FIRST_DEPOSIT_LIMIT + 1,
                });
            }
        }

        let now = self.ctx.now();
        let holdings = self.holdings()?;
        let tvl = holdings.total()?;
        let fees = self.preview_fees(&state, &params, now, &tvl)?;
        let supply = add(state.shares.total(), fees.total_shares(), "share supply")?;
        let quote = quote_deposit(amounts, &tvl, supply)?;

        if quote.shares < min_shares {
            return Err(ProtocolError::LimitUnderflow {
                what: "shares minted",
                actual: quote.shares,
                minimum: min_shares,
            });
        }
        if quote.shares == 0 || quote.amounts.iter().all(|a| *a == 0) {
            return Err(ProtocolError::ValueZero("shares minted"));
        }
        let new_balance = add(state.shares.balance_of(sender), quote.shares, "depositor shares")?;
        if new_balance > limits.token_limit_per_address {
            return Err(ProtocolError::LimitOverflow {
                what: "depositor shares",
                requested: new_balance,
                limit: limits.token_limit_per_address,
            });
        }
        let new_supply = add(supply, quote.shares, "share supply")?;
        if new_supply > limits.token_limit {
            return Err(ProtocolError::LimitOverflow {
                what: "total shares",
                requested: new_supply,
                limit: limits.token_limit,
            });
        }

        self.collect(sender, &quote.amounts)?;
        self.apply_fees(&mut state, fees)?;
        self.distribute(&holdings, &quote.amounts, options);
        state.shares.mint(sender, quote.shares)?;
        if state.high_water_mark.is_empty() {
            let mut after = tvl.clone();
            for (t, a) in after.iter_mut().zip(&quote.amounts) {
                *t = t.saturating_add(*a);
            }
            state.high_water_mark = value_per_share(&after, state.shares.total())?;
        }
        drop(state);

        info!(vault_id = self.id, depositor = %sender, shares = quote.shares, amounts = ?quote.amounts, "deposit");
        self.ctx.metrics().deposits_total.inc();
        self.ctx.events().emit(
            now,
            ProtocolEvent::Deposit {
                vault_id: self.id,
                depositor: sender,
                assets: self.assets.clone(),
                amounts: quote.amounts.clone(),
                shares: quote.shares,
            },
        );
        if let Some(callback) = params.deposit_callback {
            self.run_callback(
                callback,
                CallbackKind::Deposit,
                CallbackContext {
                    vault_id: self.id,
                    account: sender,
                    shares: quote.shares,
                    amounts: quote.amounts,
                },
            );
        }
        Ok(quote.shares)
    }

    /// Burns up to `shares` of `sender`'s shares (clamped to their balance)
    /// and sends the proportional assets to `to`. Returns the amounts sent.
    ///
    /// `options` must hold one opaque blob per sub-vault; `min_amounts` one
    /// minimum per asset.
    pub fn withdraw(
        &self,
        sender: Address,
        to: Address,
        shares: Amount,
        min_amounts: &[Amount],
        options: &[Bytes],
    ) -> ProtocolResult<Vec<Amount>> {
        let _timer = self.ctx.metrics().root_operation_seconds.start_timer();
        let params = self.governance.delayed_strategy_params(self.id)?;

        let mut state = self.state.lock();
        if state.shares.total() == 0 {
            return Err(ProtocolError::ValueZero("total shares"));
        }
        self.check_options(options, false)?;
        self.check_asset_len(min_amounts.len())?;
        if to.is_zero() {
            return Err(ProtocolError::AddressZero("withdraw recipient"));
        }
        let shares = shares.min(state.shares.balance_of(sender));
        if shares == 0 {
            return Err(ProtocolError::ValueZero("shares to burn"));
        }

        let now = self.ctx.now();
        let holdings = self.holdings()?;
        let tvl = holdings.total()?;
        let fees = self.preview_fees(&state, &params, now, &tvl)?;
        let supply = add(state.shares.total(), fees.total_shares(), "share supply")?;

        let mut amounts = holdings
            .idle
            .iter()
            .map(|idle| mul_div(*idle, shares, supply))
            .collect::<ProtocolResult<Vec<_>>>()?;
        for ((sub, row), opts) in self.subvaults.iter().zip(&holdings.subvaults).zip(options) {
            let request = row
                .iter()
                .map(|held| mul_div(*held, shares, supply))
                .collect::<ProtocolResult<Vec<_>>>()?;
            if request.iter().all(|r| *r == 0) {
                continue;
            }
            match sub
                .vault
                .pull(self.address, self.address, &self.assets, &request, opts)
            {
                Ok(actual) => {
                    for (j, requested) in request.iter().enumerate() {
                        let got = actual.get(j).copied().unwrap_or(0).min(*requested);
                        if got < *requested {
                            self.ctx.metrics().partial_fills_total.inc();
                            debug!(vault_id = self.id, subvault = sub.id, asset = j, requested, got, "partial pull");
                        }
                        amounts[j] = add(amounts[j], got, "withdraw amount")?;
                    }
                }
                Err(e) => {
                    warn!(vault_id = self.id, subvault = sub.id, error = %e, "pull failed, treated as empty");
                }
            }
        }

        for (actual, minimum) in amounts.iter().zip(min_amounts) {
            if actual < minimum {
                return Err(ProtocolError::LimitUnderflow {
                    what: "withdrawn amount",
                    actual: *actual,
                    minimum: *minimum,
                });
            }
        }

        // Shares only burn once the payout is known to be covered.
        let ledger = self.ctx.ledger();
        for (asset, amount) in self.assets.iter().zip(&amounts) {
            let available = ledger.balance_of(*asset, self.address);
            if available < *amount {
                return Err(ProtocolError::InsufficientBalance {
                    asset: *asset,
                    holder: self.address,
                    available,
                    requested: *amount,
                });
            }
        }

        self.apply_fees(&mut state, fees)?;
        state.shares.burn(sender, shares)?;
        for (asset, amount) in self.assets.iter().zip(&amounts) {
            ledger.transfer(*asset, self.address, to, *amount)?;
        }
        drop(state);

        info!(vault_id = self.id, %sender, recipient = %to, shares, ?amounts, "withdraw");
        self.ctx.metrics().withdrawals_total.inc();
        self.ctx.events().emit(
            now,
            ProtocolEvent::Withdraw {
                vault_id: self.id,
                sender,
                recipient: to,
                assets: self.assets.clone(),
                amounts: amounts.clone(),
                shares,
            },
        );
        if let Some(callback) = params.withdraw_callback {
            self.run_callback(
                callback,
                CallbackKind::Withdraw,
                CallbackContext {
                    vault_id: self.id,
                    account: to,
                    shares,
                    amounts: amounts.clone(),
                },
            );
        }
        Ok(amounts)
    }

    /// Moves shares between holders.
    pub fn transfer_shares(&self, sender: Address, to: Address, shares: Amount) -> ProtocolResult<()> {
        if shares == 0 {
            return Err(ProtocolError::ValueZero("shares"));
        }
        self.state.lock().shares.transfer(sender, to, shares)?;
        self.ctx.events().emit(
            self.ctx.now(),
            ProtocolEvent::SharesTransferred {
                vault_id: self.id,
                from: sender,
                to,
                shares,
            },
        );
        Ok(())
    }

    // ----- allow-list ----------------------------------------------------

    pub fn add_depositors_to_allowlist(&self, sender: Address, depositors: &[Address]) -> ProtocolResult<()> {
        self.ensure_strategy(sender)?;
        if depositors.iter().any(Address::is_zero) {
            return Err(ProtocolError::AddressZero("depositor"));
        }
        self.state.lock().allowlist.extend(depositors.iter().copied());
        info!(vault_id = self.id, count = depositors.len(), "depositors allow-listed");
        self.ctx.events().emit(
            self.ctx.now(),
            ProtocolEvent::DepositorsAllowlisted {
                vault_id: self.id,
                sender,
                depositors: depositors.to_vec(),
            },
        );
        Ok(())
    }

    pub fn remove_depositors_from_allowlist(&self, sender: Address, depositors: &[Address]) -> ProtocolResult<()> {
        self.ensure_strategy(sender)?;
        {
            let mut state = self.state.lock();
            for depositor in depositors {
                state.allowlist.remove(depositor);
            }
        }
        info!(vault_id = self.id, count = depositors.len(), "depositors removed from allow-list");
        self.ctx.events().emit(
            self.ctx.now(),
            ProtocolEvent::DepositorsRemoved {
                vault_id: self.id,
                sender,
                depositors: depositors.to_vec(),
            },
        );
        Ok(())
    }

    // ----- rebalancing ---------------------------------------------------

    /// Pulls up to `amounts` out of sub-vault `from` and pushes what arrived
    /// into sub-vault `to`. Strategy only. Returns `(pulled, pushed)`;
    /// anything pulled but not pushed stays idle, including everything when
    /// the target refuses the push outright.
    pub fn rebalance(
        &self,
        sender: Address,
        from: VaultId,
        to: VaultId,
        amounts: &[Amount],
        pull_options: &[u8],
        push_options: &[u8],
    ) -> ProtocolResult<(Vec<Amount>, Vec<Amount>)> {
        self.ensure_strategy(sender)?;
        self.check_asset_len(amounts.len())?;
        if from == to {
            return Err(ProtocolError::Duplicate(format!("rebalance from and to {from}")));
        }
        let source = self.subvault(from)?;
        let target = self.subvault(to)?;

        let _guard = self.state.lock();
        let pulled = source
            .vault
            .pull(self.address, self.address, &self.assets, amounts, pull_options)?;
        let pulled: Vec<Amount> = pulled
            .iter()
            .zip(amounts)
            .map(|(got, requested)| (*got).min(*requested))
            .collect();
        let pushed = match target
            .vault
            .push(self.address, self.address, &self.assets, &pulled, push_options)
        {
            Ok(pushed) => pushed,
            Err(e) => {
                warn!(vault_id = self.id, subvault = to, error = %e, "push failed, funds stay idle");
                vec![0; pulled.len()]
            }
        };
        info!(vault_id = self.id, from, to, ?pulled, ?pushed, "rebalanced");
        self.ctx.events().emit(
            self.ctx.now(),
            ProtocolEvent::Rebalanced {
                vault_id: self.id,
                sender,
                from_vault: from,
                to_vault: to,
                pulled: pulled.clone(),
                pushed: pushed.clone(),
            },
        );
        Ok((pulled, pushed))
    }

    fn subvault(&self, id: VaultId) -> ProtocolResult<&Subvault> {
        self.subvaults
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ProtocolError::invalid_value(format!("{id} is not a subvault of {}", self.id)))
    }
}

//! # Vault Governance
//!
//! One [`VaultGovernance`] per vault family. It creates vaults of that
//! family and owns their parameters, split into tiers by who may change
//! them and how fast:
//!
//! | Tier                         | Scope      | Change                 | Who                 |
//! |------------------------------|------------|------------------------|---------------------|
//! | delayed strategy             | per vault  | stage → delay → commit | admin or vault owner|
//! | strategy                     | per vault  | immediate              | admin or vault owner|
//! | delayed protocol             | family     | stage → delay → commit | admin               |
//! | delayed protocol per vault   | per vault  | stage → delay → commit | admin               |
//! | operator                     | family     | immediate              | admin or operator   |
//!
//! Anything that can hurt depositors (fees, treasuries, privacy) sits in a
//! delayed tier. Immediate tiers only hold limits and kill switches.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{payload, ParamTier, ProtocolEvent};
use crate::governance::params::{ParamSlot, ParameterStore};
use crate::governance::protocol::{PermissionSet, ProtocolParams};
use crate::registry::{BoundVault, VaultRecord};
use crate::types::{is_sorted_and_unique, Address, AssetId, Timestamp, VaultId, VaultKind};
use crate::version;

/// Bounds shared by every governed parameter struct.
pub trait ParamValue: Clone + Debug + Default + PartialEq + Serialize + Send + Sync + 'static {}

impl<T> ParamValue for T where T: Clone + Debug + Default + PartialEq + Serialize + Send + Sync + 'static {}

/// A vault family: its kind, its parameter tiers and their validation.
///
/// Tiers a family does not use are `()`.
pub trait VaultFamily: Send + Sync + 'static {
    const KIND: VaultKind;
    const NAME: &'static str;
    /// `major.minor.patch`.
    const VERSION: &'static str;

    type DelayedStrategyParams: ParamValue;
    type StrategyParams: ParamValue;
    type DelayedProtocolParams: ParamValue;
    type DelayedProtocolPerVaultParams: ParamValue;
    type OperatorParams: ParamValue;

    /// Delayed strategy params a new vault starts with.
    fn initial_delayed_strategy_params(owner: Address) -> Self::DelayedStrategyParams {
        let _ = owner;
        Self::DelayedStrategyParams::default()
    }

    fn validate_delayed_strategy_params(
        params: &Self::DelayedStrategyParams,
        protocol: &ProtocolParams,
    ) -> ProtocolResult<()> {
        let _ = (params, protocol);
        Ok(())
    }

    fn validate_strategy_params(params: &Self::StrategyParams) -> ProtocolResult<()> {
        let _ = params;
        Ok(())
    }

    fn validate_delayed_protocol_params(params: &Self::DelayedProtocolParams) -> ProtocolResult<()> {
        let _ = params;
        Ok(())
    }

    fn validate_delayed_protocol_per_vault_params(
        params: &Self::DelayedProtocolPerVaultParams,
        protocol: &ProtocolParams,
    ) -> ProtocolResult<()> {
        let _ = (params, protocol);
        Ok(())
    }
}

/// Creates and governs vaults of family `F`.
pub struct VaultGovernance<F: VaultFamily> {
    address: Address,
    ctx: Arc<ProtocolContext>,
    vaults: RwLock<BTreeSet<VaultId>>,
    delayed_strategy: ParameterStore<VaultId, F::DelayedStrategyParams>,
    strategy: DashMap<VaultId, F::StrategyParams>,
    delayed_protocol: Mutex<ParamSlot<F::DelayedProtocolParams>>,
    delayed_protocol_per_vault: ParameterStore<VaultId, F::DelayedProtocolPerVaultParams>,
    operator: RwLock<F::OperatorParams>,
    _family: PhantomData<F>,
}

impl<F: VaultFamily> VaultGovernance<F> {
    /// Creates the governance at `address` with initial family-wide
    /// protocol params. It still needs the `RegisterVault` permission
    /// before it can create vaults.
    pub fn new(
        ctx: Arc<ProtocolContext>,
        address: Address,
        delayed_protocol_params: F::DelayedProtocolParams,
    ) -> ProtocolResult<Self> {
        if address.is_zero() {
            return Err(ProtocolError::AddressZero("vault governance"));
        }
        F::validate_delayed_protocol_params(&delayed_protocol_params)?;
        Ok(Self {
            address,
            ctx,
            vaults: RwLock::new(BTreeSet::new()),
            delayed_strategy: ParameterStore::new(),
            strategy: DashMap::new(),
            delayed_protocol: Mutex::new(ParamSlot::new(delayed_protocol_params)),
            delayed_protocol_per_vault: ParameterStore::new(),
            operator: RwLock::new(F::OperatorParams::default()),
            _family: PhantomData,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ctx(&self) -> &Arc<ProtocolContext> {
        &self.ctx
    }

    pub fn contract_name(&self) -> &'static str {
        F::NAME
    }

    /// Packed `major.minor.patch`; see [`version::numberify`].
    pub fn contract_version(&self) -> u32 {
        version::numberify(F::VERSION)
    }

    /// Vaults created by this governance, ascending.
    pub fn vaults(&self) -> Vec<VaultId> {
        self.vaults.read().iter().copied().collect()
    }

    fn now(&self) -> Timestamp {
        self.ctx.now()
    }

    fn delay(&self) -> u64 {
        self.ctx.governance().governance_delay()
    }

    fn ensure_managed(&self, id: VaultId) -> ProtocolResult<()> {
        if self.vaults.read().contains(&id) {
            Ok(())
        } else {
            Err(ProtocolError::UnknownVault(id))
        }
    }

    fn ensure_admin(&self, sender: Address) -> ProtocolResult<()> {
        self.ctx.governance().ensure_admin(sender)
    }

    /// Admin, or owner / approved delegate of the vault's handle.
    pub fn is_strategy(&self, sender: Address, id: VaultId) -> bool {
        self.ctx.governance().is_admin(sender)
            || self.ctx.registry().is_owner_or_approved(id, sender)
    }

    fn ensure_strategy(&self, sender: Address, id: VaultId) -> ProtocolResult<()> {
        self.ensure_managed(id)?;
        if self.is_strategy(sender, id) {
            Ok(())
        } else {
            Err(ProtocolError::forbidden(format!(
                "{sender} is neither admin nor strategy of vault {id}"
            )))
        }
    }

    // ----- creation ------------------------------------------------------

    /// Everything `create_vault` checks before touching any state.
    pub fn check_create(&self, sender: Address, assets: &[AssetId], owner: Address) -> ProtocolResult<()> {
        let governance = self.ctx.governance();
        if !governance.has_permission(self.address, PermissionSet::REGISTER_VAULT) {
            return Err(ProtocolError::forbidden(format!(
                "governance {} may not register vaults",
                self.address
            )));
        }
        if !governance.has_permission(sender, PermissionSet::CREATE_VAULT) {
            return Err(ProtocolError::forbidden(format!("{sender} may not create vaults")));
        }
        if owner.is_zero() {
            return Err(ProtocolError::AddressZero("vault owner"));
        }
        if assets.is_empty() {
            return Err(ProtocolError::EmptyList("vault assets"));
        }
        if !is_sorted_and_unique(assets) {
            return Err(ProtocolError::Invariant(
                "vault assets must be strictly increasing".into(),
            ));
        }
        let max = governance.max_tokens_per_vault();
        if assets.len() > max {
            return Err(ProtocolError::LimitOverflow {
                what: "vault assets",
                requested: assets.len() as u128,
                limit: max as u128,
            });
        }
        if let Some(asset) = assets
            .iter()
            .find(|a| !governance.has_permission(**a, PermissionSet::VAULT_TOKEN))
        {
            return Err(ProtocolError::forbidden(format!(
                "{asset} is not an approved vault token"
            )));
        }
        Ok(())
    }

    /// Registers a new vault owned by `owner`, seeds its parameters, builds
    /// the instance with `build` and binds it in the registry.
    ///
    /// `build` receives the fresh registry record and returns the caller's
    /// handle plus what the registry should bind. If building or binding
    /// fails, the seeded parameters are dropped and the registration is
    /// discarded: the id stays spent but no vault ever answers to it.
    pub fn create_vault<V, B>(
        &self,
        sender: Address,
        assets: Vec<AssetId>,
        owner: Address,
        build: B,
    ) -> ProtocolResult<V>
    where
        B: FnOnce(&VaultRecord) -> ProtocolResult<(V, BoundVault)>,
    {
        self.check_create(sender, &assets, owner)?;
        let registry = self.ctx.registry();
        let record = registry.register(self.address, F::KIND, assets, owner)?;
        let id = record.id;

        self.delayed_strategy
            .init(id, F::initial_delayed_strategy_params(owner));
        self.strategy.insert(id, F::StrategyParams::default());
        self.delayed_protocol_per_vault
            .init(id, F::DelayedProtocolPerVaultParams::default());
        self.vaults.write().insert(id);

        let created = build(&record).and_then(|(vault, bound)| {
            registry.bind(self.address, id, bound)?;
            Ok(vault)
        });
        match created {
            Ok(vault) => {
                info!(vault_id = id, family = F::NAME, %owner, "vault created");
                Ok(vault)
            }
            Err(e) => {
                self.abandon(id);
                warn!(vault_id = id, family = F::NAME, error = %e, "vault creation rolled back");
                Err(e)
            }
        }
    }

    fn abandon(&self, id: VaultId) {
        self.vaults.write().remove(&id);
        self.delayed_strategy.remove(&id);
        self.strategy.remove(&id);
        self.delayed_protocol_per_vault.remove(&id);
        if let Err(e) = self.ctx.registry().discard(self.address, id) {
            warn!(vault_id = id, error = %e, "registration not discarded");
        }
    }

    // ----- delayed strategy params ---------------------------------------

    pub fn delayed_strategy_params(&self, id: VaultId) -> ProtocolResult<F::DelayedStrategyParams> {
        self.ensure_managed(id)?;
        Ok(self.delayed_strategy.active(&id))
    }

    pub fn staged_delayed_strategy_params(
        &self,
        id: VaultId,
    ) -> ProtocolResult<Option<F::DelayedStrategyParams>> {
        self.ensure_managed(id)?;
        Ok(self.delayed_strategy.staged(&id))
    }

    pub fn stage_delayed_strategy_params(
        &self,
        sender: Address,
        id: VaultId,
        params: F::DelayedStrategyParams,
    ) -> ProtocolResult<Timestamp> {
        self.ensure_strategy(sender, id)?;
        F::validate_delayed_strategy_params(&params, &self.ctx.governance().params())?;
        let now = self.now();
        let ready_at = self.delayed_strategy.stage(id, params.clone(), now, self.delay());
        info!(vault_id = id, %sender, ready_at, "delayed strategy params staged");
        self.ctx.events().emit(
            now,
            ProtocolEvent::StageDelayedStrategyParams {
                origin: self.address,
                sender,
                vault_id: id,
                params: payload(&params),
                ready_at,
            },
        );
        Ok(ready_at)
    }

    pub fn commit_delayed_strategy_params(
        &self,
        sender: Address,
        id: VaultId,
    ) -> ProtocolResult<F::DelayedStrategyParams> {
        self.ensure_strategy(sender, id)?;
        let now = self.now();
        let params = self.delayed_strategy.commit(&id, now, self.delay())?;
        info!(vault_id = id, %sender, "delayed strategy params committed");
        self.ctx.metrics().governance_commits_total.inc();
        self.ctx.events().emit(
            now,
            ProtocolEvent::CommitDelayedStrategyParams {
                origin: self.address,
                sender,
                vault_id: id,
                params: payload(&params),
            },
        );
        Ok(params)
    }

    pub fn cancel_delayed_strategy_params(&self, sender: Address, id: VaultId) -> ProtocolResult<()> {
        self.ensure_strategy(sender, id)?;
        self.delayed_strategy.cancel(&id)?;
        self.emit_cancelled(sender, ParamTier::DelayedStrategy, Some(id));
        Ok(())
    }

    // ----- strategy params (immediate) -----------------------------------

    pub fn strategy_params(&self, id: VaultId) -> ProtocolResult<F::StrategyParams> {
        self.ensure_managed(id)?;
        Ok(self
            .strategy
            .get(&id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }

    pub fn set_strategy_params(
        &self,
        sender: Address,
        id: VaultId,
        params: F::StrategyParams,
    ) -> ProtocolResult<()> {
        self.ensure_strategy(sender, id)?;
        F::validate_strategy_params(&params)?;
        self.strategy.insert(id, params.clone());
        info!(vault_id = id, %sender, "strategy params set");
        self.ctx.events().emit(
            self.now(),
            ProtocolEvent::SetStrategyParams {
                origin: self.address,
                sender,
                vault_id: id,
                params: payload(&params),
            },
        );
        Ok(())
    }

    // ----- delayed protocol params ---------------------------------------

    pub fn delayed_protocol_params(&self) -> F::DelayedProtocolParams {
        self.delayed_protocol.lock().active().clone()
    }

    pub fn staged_delayed_protocol_params(&self) -> Option<F::DelayedProtocolParams> {
        self.delayed_protocol.lock().staged().cloned()
    }

    pub fn stage_delayed_protocol_params(
        &self,
        sender: Address,
        params: F::DelayedProtocolParams,
    ) -> ProtocolResult<Timestamp> {
        self.ensure_admin(sender)?;
        F::validate_delayed_protocol_params(&params)?;
        let now = self.now();
        let ready_at = now.saturating_add(self.delay());
        self.delayed_protocol.lock().stage(params.clone(), now);
        info!(%sender, ready_at, family = F::NAME, "delayed protocol params staged");
        self.ctx.events().emit(
            now,
            ProtocolEvent::StageDelayedProtocolParams {
                origin: self.address,
                sender,
                params: payload(&params),
                ready_at,
            },
        );
        Ok(ready_at)
    }

    pub fn commit_delayed_protocol_params(&self, sender: Address) -> ProtocolResult<F::DelayedProtocolParams> {
        self.ensure_admin(sender)?;
        let now = self.now();
        let delay = self.delay();
        let params = self.delayed_protocol.lock().commit(now, delay)?.clone();
        info!(%sender, family = F::NAME, "delayed protocol params committed");
        self.ctx.metrics().governance_commits_total.inc();
        self.ctx.events().emit(
            now,
            ProtocolEvent::CommitDelayedProtocolParams {
                origin: self.address,
                sender,
                params: payload(&params),
            },
        );
        Ok(params)
    }

    pub fn cancel_delayed_protocol_params(&self, sender: Address) -> ProtocolResult<()> {
        self.ensure_admin(sender)?;
        if !self.delayed_protocol.lock().cancel() {
            return Err(ProtocolError::NothingStaged);
        }
        self.emit_cancelled(sender, ParamTier::DelayedProtocol, None);
        Ok(())
    }

    // ----- delayed protocol per-vault params -----------------------------

    pub fn delayed_protocol_per_vault_params(
        &self,
        id: VaultId,
    ) -> ProtocolResult<F::DelayedProtocolPerVaultParams> {
        self.ensure_managed(id)?;
        Ok(self.delayed_protocol_per_vault.active(&id))
    }

    pub fn staged_delayed_protocol_per_vault_params(
        &self,
        id: VaultId,
    ) -> ProtocolResult<Option<F::DelayedProtocolPerVaultParams>> {
        self.ensure_managed(id)?;
        Ok(self.delayed_protocol_per_vault.staged(&id))
    }

    pub fn stage_delayed_protocol_per_vault_params(
        &self,
        sender: Address,
        id: VaultId,
        params: F::DelayedProtocolPerVaultParams,
    ) -> ProtocolResult<Timestamp> {
        self.ensure_admin(sender)?;
        self.ensure_managed(id)?;
        F::validate_delayed_protocol_per_vault_params(&params, &self.ctx.governance().params())?;
        let now = self.now();
        let ready_at = self
            .delayed_protocol_per_vault
            .stage(id, params.clone(), now, self.delay());
        info!(vault_id = id, %sender, ready_at, "delayed protocol per-vault params staged");
        self.ctx.events().emit(
            now,
            ProtocolEvent::StageDelayedProtocolPerVaultParams {
                origin: self.address,
                sender,
                vault_id: id,
                params: payload(&params),
                ready_at,
            },
        );
        Ok(ready_at)
    }

    pub fn commit_delayed_protocol_per_vault_params(
        &self,
        sender: Address,
        id: VaultId,
    ) -> ProtocolResult<F::DelayedProtocolPerVaultParams> {
        self.ensure_admin(sender)?;
        self.ensure_managed(id)?;
        let now = self.now();
        let params = self
            .delayed_protocol_per_vault
            .commit(&id, now, self.delay())?;
        info!(vault_id = id, %sender, "delayed protocol per-vault params committed");
        self.ctx.metrics().governance_commits_total.inc();
        self.ctx.events().emit(
            now,
            ProtocolEvent::CommitDelayedProtocolPerVaultParams {
                origin: self.address,
                sender,
                vault_id: id,
                params: payload(&params),
            },
        );
        Ok(params)
    }

    // ----- operator params (immediate) -----------------------------------

    pub fn operator_params(&self) -> F::OperatorParams {
        self.operator.read().clone()
    }

    pub fn set_operator_params(&self, sender: Address, params: F::OperatorParams) -> ProtocolResult<()> {
        if !self.ctx.governance().is_operator(sender) {
            return Err(ProtocolError::forbidden(format!(
                "{sender} is neither admin nor operator"
            )));
        }
        *self.operator.write() = params.clone();
        info!(%sender, family = F::NAME, "operator params set");
        self.ctx.events().emit(
            self.now(),
            ProtocolEvent::SetOperatorParams {
                origin: self.address,
                sender,
                params: payload(&params),
            },
        );
        Ok(())
    }

    fn emit_cancelled(&self, sender: Address, tier: ParamTier, vault_id: Option<VaultId>) {
        info!(%sender, ?tier, ?vault_id, "staged params cancelled");
        self.ctx.events().emit(
            self.now(),
            ProtocolEvent::StagedParamsCancelled {
                origin: self.address,
                sender,
                tier,
                vault_id,
            },
        );
    }
}

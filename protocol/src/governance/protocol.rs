//! # Protocol Governance
//!
//! Protocol-wide knobs and who may turn them:
//!
//! - **Roles** — admins (may change anything, through the timelock) and
//!   operators (may flip operational switches like pausing deposits).
//! - **Parameters** — [`ProtocolParams`], one timelocked slot. The delay used
//!   to commit a change is whatever delay is in force at commit time.
//! - **Permissions** — which addresses may register vaults, create vaults,
//!   or be used as vault assets. Grants go through the timelock; revocations
//!   take effect immediately, since removing authority is never the attack.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;
use crate::config::{
    DEFAULT_GOVERNANCE_DELAY, DEFAULT_MAX_TOKENS_PER_VAULT, MAX_GOVERNANCE_DELAY,
    MAX_MANAGEMENT_FEE, MAX_PERFORMANCE_FEE, MAX_PROTOCOL_FEE,
};
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{payload, EventLog, ParamTier, ProtocolEvent};
use crate::governance::params::{ParamSlot, ParameterStore};
use crate::metrics::ProtocolMetrics;
use crate::types::{Address, Timestamp};

// ---------------------------------------------------------------------------
// Roles & permissions
// ---------------------------------------------------------------------------

/// Protocol-level roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

/// Bitmask of protocol permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PermissionSet(u8);

impl PermissionSet {
    pub const NONE: PermissionSet = PermissionSet(0);
    /// May register vaults in the ownership registry (vault governances).
    pub const REGISTER_VAULT: PermissionSet = PermissionSet(1 << 0);
    /// May create vaults through a vault governance.
    pub const CREATE_VAULT: PermissionSet = PermissionSet(1 << 1);
    /// May be used as an asset in a vault's asset set.
    pub const VAULT_TOKEN: PermissionSet = PermissionSet(1 << 2);

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn union(self, other: PermissionSet) -> PermissionSet {
        PermissionSet(self.0 | other.0)
    }

    pub const fn without(self, other: PermissionSet) -> PermissionSet {
        PermissionSet(self.0 & !other.0)
    }

    pub const fn contains(&self, other: PermissionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Protocol-wide parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Largest asset set a vault may be created with.
    pub max_tokens_per_vault: usize,
    /// Seconds between staging and committing any governed parameter.
    pub governance_delay: u64,
    /// Receives protocol fee shares.
    pub protocol_treasury: Address,
    /// Ceiling on per-vault management fees (fee denominator units).
    pub max_management_fee: u64,
    /// Ceiling on per-vault performance fees.
    pub max_performance_fee: u64,
    /// Ceiling on per-vault protocol fees.
    pub max_protocol_fee: u64,
    /// Permissions every address holds without a grant.
    pub force_allow_mask: PermissionSet,
}

impl ProtocolParams {
    /// Defaults with the given treasury: one-day delay, ten assets per vault,
    /// fee ceilings at their absolute maximum, anyone may create vaults from
    /// any asset.
    pub fn with_treasury(protocol_treasury: Address) -> Self {
        Self {
            max_tokens_per_vault: DEFAULT_MAX_TOKENS_PER_VAULT,
            governance_delay: DEFAULT_GOVERNANCE_DELAY,
            protocol_treasury,
            max_management_fee: MAX_MANAGEMENT_FEE,
            max_performance_fee: MAX_PERFORMANCE_FEE,
            max_protocol_fee: MAX_PROTOCOL_FEE,
            force_allow_mask: PermissionSet::CREATE_VAULT.union(PermissionSet::VAULT_TOKEN),
        }
    }

    pub fn validate(&self) -> ProtocolResult<()> {
        if self.max_tokens_per_vault == 0 {
            return Err(ProtocolError::ValueZero("max tokens per vault"));
        }
        if self.governance_delay > MAX_GOVERNANCE_DELAY {
            return Err(ProtocolError::LimitOverflow {
                what: "governance delay",
                requested: self.governance_delay.into(),
                limit: MAX_GOVERNANCE_DELAY.into(),
            });
        }
        if self.protocol_treasury.is_zero() {
            return Err(ProtocolError::AddressZero("protocol treasury"));
        }
        let caps = [
            ("max management fee", self.max_management_fee, MAX_MANAGEMENT_FEE),
            ("max performance fee", self.max_performance_fee, MAX_PERFORMANCE_FEE),
            ("max protocol fee", self.max_protocol_fee, MAX_PROTOCOL_FEE),
        ];
        for (what, value, limit) in caps {
            if value > limit {
                return Err(ProtocolError::LimitOverflow {
                    what,
                    requested: value.into(),
                    limit: limit.into(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProtocolGovernance
// ---------------------------------------------------------------------------

/// Roles, protocol parameters and permissions.
pub struct ProtocolGovernance {
    address: Address,
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    metrics: ProtocolMetrics,
    admins: RwLock<BTreeSet<Address>>,
    operators: RwLock<BTreeSet<Address>>,
    params: Mutex<ParamSlot<ProtocolParams>>,
    permissions: ParameterStore<Address, PermissionSet>,
}

impl ProtocolGovernance {
    /// Creates the governance with one admin and initial parameters.
    pub fn new(
        address: Address,
        admin: Address,
        params: ProtocolParams,
        clock: Arc<dyn Clock>,
        events: Arc<EventLog>,
        metrics: ProtocolMetrics,
    ) -> ProtocolResult<Self> {
        if admin.is_zero() {
            return Err(ProtocolError::AddressZero("admin"));
        }
        params.validate()?;
        Ok(Self {
            address,
            clock,
            events,
            metrics,
            admins: RwLock::new(BTreeSet::from([admin])),
            operators: RwLock::new(BTreeSet::new()),
            params: Mutex::new(ParamSlot::new(params)),
            permissions: ParameterStore::new(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    // ----- roles ---------------------------------------------------------

    pub fn is_admin(&self, account: Address) -> bool {
        self.admins.read().contains(&account)
    }

    /// Operators and admins both pass.
    pub fn is_operator(&self, account: Address) -> bool {
        self.operators.read().contains(&account) || self.is_admin(account)
    }

    pub fn has_role(&self, role: Role, account: Address) -> bool {
        match role {
            Role::Admin => self.is_admin(account),
            Role::Operator => self.operators.read().contains(&account),
        }
    }

    /// Fails with `Forbidden` unless `sender` is an admin.
    pub fn ensure_admin(&self, sender: Address) -> ProtocolResult<()> {
        if self.is_admin(sender) {
            Ok(())
        } else {
            Err(ProtocolError::forbidden(format!("{sender} is not a protocol admin")))
        }
    }

    pub fn grant_role(&self, sender: Address, role: Role, account: Address) -> ProtocolResult<()> {
        self.ensure_admin(sender)?;
        if account.is_zero() {
            return Err(ProtocolError::AddressZero("role account"));
        }
        let inserted = match role {
            Role::Admin => self.admins.write().insert(account),
            Role::Operator => self.operators.write().insert(account),
        };
        if inserted {
            info!(%role, %account, "role granted");
            self.events.emit(
                self.clock.now(),
                ProtocolEvent::RoleGranted {
                    origin: self.address,
                    sender,
                    role,
                    account,
                },
            );
        }
        Ok(())
    }

    /// Revokes a role. The last admin cannot be removed.
    pub fn revoke_role(&self, sender: Address, role: Role, account: Address) -> ProtocolResult<()> {
        self.ensure_admin(sender)?;
        let removed = match role {
            Role::Admin => {
                let mut admins = self.admins.write();
                if admins.len() == 1 && admins.contains(&account) {
                    return Err(ProtocolError::forbidden("cannot revoke the last admin"));
                }
                admins.remove(&account)
            }
            Role::Operator => self.operators.write().remove(&account),
        };
        if removed {
            info!(%role, %account, "role revoked");
            self.events.emit(
                self.clock.now(),
                ProtocolEvent::RoleRevoked {
                    origin: self.address,
                    sender,
                    role,
                    account,
                },
            );
        }
        Ok(())
    }

    // ----- parameters ----------------------------------------------------

    /// Parameters in force.
    pub fn params(&self) -> ProtocolParams {
        self.params.lock().active().clone()
    }

    /// Pending parameters, if any.
    pub fn staged_params(&self) -> Option<ProtocolParams> {
        self.params.lock().staged().cloned()
    }

    pub fn governance_delay(&self) -> u64 {
        self.params.lock().active().governance_delay
    }

    pub fn max_tokens_per_vault(&self) -> usize {
        self.params.lock().active().max_tokens_per_vault
    }

    pub fn protocol_treasury(&self) -> Address {
        self.params.lock().active().protocol_treasury
    }

    /// Stages new parameters. Returns the earliest commit time.
    pub fn stage_params(&self, sender: Address, params: ProtocolParams) -> ProtocolResult<Timestamp> {
        self.ensure_admin(sender)?;
        params.validate()?;
        let now = self.clock.now();
        let ready_at = {
            let mut slot = self.params.lock();
            let delay = slot.active().governance_delay;
            slot.stage(params.clone(), now);
            now.saturating_add(delay)
        };
        info!(%sender, ready_at, "protocol params staged");
        self.events.emit(
            now,
            ProtocolEvent::StageProtocolParams {
                origin: self.address,
                sender,
                params: payload(&params),
                ready_at,
            },
        );
        Ok(ready_at)
    }

    /// Commits staged parameters once the current delay has elapsed.
    pub fn commit_params(&self, sender: Address) -> ProtocolResult<ProtocolParams> {
        self.ensure_admin(sender)?;
        let now = self.clock.now();
        let committed = {
            let mut slot = self.params.lock();
            let delay = slot.active().governance_delay;
            slot.commit(now, delay)?.clone()
        };
        info!(%sender, delay = committed.governance_delay, "protocol params committed");
        self.metrics.governance_commits_total.inc();
        self.events.emit(
            now,
            ProtocolEvent::CommitProtocolParams {
                origin: self.address,
                sender,
                params: payload(&committed),
            },
        );
        Ok(committed)
    }

    pub fn cancel_params(&self, sender: Address) -> ProtocolResult<()> {
        self.ensure_admin(sender)?;
        if !self.params.lock().cancel() {
            return Err(ProtocolError::NothingStaged);
        }
        self.events.emit(
            self.clock.now(),
            ProtocolEvent::StagedParamsCancelled {
                origin: self.address,
                sender,
                tier: ParamTier::Protocol,
                vault_id: None,
            },
        );
        Ok(())
    }

    // ----- permissions ---------------------------------------------------

    /// Permissions explicitly granted to `account` (without the force mask).
    pub fn permissions_of(&self, account: Address) -> PermissionSet {
        self.permissions.active(&account)
    }

    /// Returns `true` if `account` holds every permission in `required`,
    /// either by grant or through the force-allow mask.
    pub fn has_permission(&self, account: Address, required: PermissionSet) -> bool {
        let forced = self.params.lock().active().force_allow_mask;
        self.permissions_of(account).union(forced).contains(required)
    }

    pub fn staged_permission_grants(&self, account: Address) -> Option<PermissionSet> {
        self.permissions.staged(&account)
    }

    /// Stages `permissions` for `target`. A later stage for the same target
    /// replaces the pending grant and restarts the clock.
    pub fn stage_permission_grants(
        &self,
        sender: Address,
        target: Address,
        permissions: PermissionSet,
    ) -> ProtocolResult<Timestamp> {
        self.ensure_admin(sender)?;
        if target.is_zero() {
            return Err(ProtocolError::AddressZero("permission target"));
        }
        if permissions.is_empty() {
            return Err(ProtocolError::ValueZero("permission mask"));
        }
        let now = self.clock.now();
        let ready_at = self
            .permissions
            .stage(target, permissions, now, self.governance_delay());
        info!(%target, mask = permissions.bits(), ready_at, "permission grants staged");
        self.events.emit(
            now,
            ProtocolEvent::PermissionGrantsStaged {
                origin: self.address,
                sender,
                target,
                permissions,
                ready_at,
            },
        );
        Ok(ready_at)
    }

    /// Adds the staged grants for `target` to its active permissions.
    pub fn commit_permission_grants(
        &self,
        sender: Address,
        target: Address,
    ) -> ProtocolResult<PermissionSet> {
        self.ensure_admin(sender)?;
        let now = self.clock.now();
        let delay = self.governance_delay();
        let mut granted = PermissionSet::NONE;
        let active = self
            .permissions
            .commit_with(&target, now, delay, |active, staged| {
                granted = staged;
                active.union(staged)
            })?;
        info!(%target, mask = active.bits(), "permission grants committed");
        self.metrics.governance_commits_total.inc();
        self.events.emit(
            now,
            ProtocolEvent::PermissionGrantsCommitted {
                origin: self.address,
                sender,
                target,
                permissions: granted,
            },
        );
        Ok(active)
    }

    /// Removes `permissions` from `target` immediately, including from any
    /// grant still waiting out its delay.
    pub fn revoke_permissions(
        &self,
        sender: Address,
        target: Address,
        permissions: PermissionSet,
    ) -> ProtocolResult<()> {
        self.ensure_admin(sender)?;
        if target.is_zero() {
            return Err(ProtocolError::AddressZero("permission target"));
        }
        self.permissions.update(target, |slot| {
            slot.update_active(|mask| *mask = mask.without(permissions));
            slot.update_staged(|mask| *mask = mask.without(permissions));
        });
        info!(%target, mask = permissions.bits(), "permissions revoked");
        self.events.emit(
            self.clock.now(),
            ProtocolEvent::PermissionsRevoked {
                origin: self.address,
                sender,
                target,
                permissions,
            },
        );
        Ok(())
    }

    /// Addresses explicitly granted every permission in `required`, sorted.
    pub fn addresses_by_permission(&self, required: PermissionSet) -> Vec<Address> {
        let mut addresses = self.permissions.keys_where(|mask| mask.contains(required));
        addresses.sort();
        addresses
    }
}

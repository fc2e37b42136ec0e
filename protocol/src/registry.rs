//! # Vault Ownership Registry
//!
//! Every vault gets a numeric handle when it is registered. Whoever holds
//! the handle owns the vault: for a custodian sitting under a root vault,
//! that owner is the root vault itself.
//!
//! Handles behave like non-fungible tokens:
//!
//! - ids start at 1 and only ever go up; an id is never handed out twice,
//!   even when the registration behind it is discarded,
//! - the owner can approve a single delegate per handle, or an operator for
//!   all of their handles,
//! - owner, delegate or operator can transfer; a transfer clears the
//!   per-handle approval,
//! - the owner can lock a handle, after which it never moves again.
//!
//! The registry also keeps the live vault instance bound to each id so
//! root vaults can resolve their sub-vaults and check their capabilities.
//! A registration is announced once its instance is bound. Until then the
//! registrar may discard it, and the id reads as unknown from then on.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::FIRST_VAULT_ID;
use crate::error::{ProtocolError, ProtocolResult};
use crate::events::{EventLog, ProtocolEvent};
use crate::metrics::ProtocolMetrics;
use crate::types::{Address, AssetId, CapabilitySet, Timestamp, VaultId, VaultKind};
use crate::vault::root::RootVault;
use crate::vault::IntegrationVault;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What the registry knows about a vault. Everything but `owner` and
/// `locked` is fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: VaultId,
    pub kind: VaultKind,
    /// Asset set, strictly increasing.
    pub assets: Vec<AssetId>,
    /// The vault governance that registered it.
    pub registrar: Address,
    pub owner: Address,
    pub registered_at: Timestamp,
    pub locked: bool,
}

/// A live vault instance bound to a registry id.
#[derive(Clone)]
pub enum BoundVault {
    Integration(Arc<dyn IntegrationVault>),
    Root(Arc<RootVault>),
}

impl BoundVault {
    pub fn capabilities(&self) -> CapabilitySet {
        match self {
            BoundVault::Integration(vault) => vault.capabilities(),
            BoundVault::Root(_) => CapabilitySet::ROOT,
        }
    }
}

struct Entry {
    record: VaultRecord,
    approved: Option<Address>,
    instance: Option<BoundVault>,
    discarded: bool,
}

// ---------------------------------------------------------------------------
// VaultRegistry
// ---------------------------------------------------------------------------

pub struct VaultRegistry {
    clock: Arc<dyn Clock>,
    events: Arc<EventLog>,
    metrics: ProtocolMetrics,
    entries: RwLock<Vec<Entry>>,
    operators: RwLock<HashSet<(Address, Address)>>,
}

impl VaultRegistry {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<EventLog>, metrics: ProtocolMetrics) -> Self {
        Self {
            clock,
            events,
            metrics,
            entries: RwLock::new(Vec::new()),
            operators: RwLock::new(HashSet::new()),
        }
    }

    fn index(id: VaultId) -> Option<usize> {
        id.checked_sub(FIRST_VAULT_ID).map(|i| i as usize)
    }

    fn live(entries: &[Entry], id: VaultId) -> ProtocolResult<&Entry> {
        Self::index(id)
            .and_then(|i| entries.get(i))
            .filter(|e| !e.discarded)
            .ok_or(ProtocolError::UnknownVault(id))
    }

    fn live_mut(entries: &mut [Entry], id: VaultId) -> ProtocolResult<&mut Entry> {
        Self::index(id)
            .and_then(|i| entries.get_mut(i))
            .filter(|e| !e.discarded)
            .ok_or(ProtocolError::UnknownVault(id))
    }

    fn with_entry<R>(&self, id: VaultId, f: impl FnOnce(&Entry) -> R) -> ProtocolResult<R> {
        let entries = self.entries.read();
        Self::live(&entries, id).map(f)
    }

    fn check_registrar(entry: &Entry, registrar: Address) -> ProtocolResult<()> {
        if entry.record.registrar != registrar {
            return Err(ProtocolError::forbidden(format!(
                "{registrar} did not register vault {}",
                entry.record.id
            )));
        }
        Ok(())
    }

    /// Number of ids handed out so far, discarded ones included.
    pub fn vaults_count(&self) -> u64 {
        self.entries.read().len() as u64
    }

    /// The id the next registration will receive.
    pub fn next_id(&self) -> VaultId {
        self.vaults_count() + FIRST_VAULT_ID
    }

    /// Registers a new vault owned by `owner`. Called by vault governances
    /// after their own permission checks.
    pub fn register(
        &self,
        registrar: Address,
        kind: VaultKind,
        assets: Vec<AssetId>,
        owner: Address,
    ) -> ProtocolResult<VaultRecord> {
        if owner.is_zero() {
            return Err(ProtocolError::AddressZero("vault owner"));
        }
        let now = self.clock.now();
        let record = {
            let mut entries = self.entries.write();
            let record = VaultRecord {
                id: entries.len() as VaultId + FIRST_VAULT_ID,
                kind,
                assets,
                registrar,
                owner,
                registered_at: now,
                locked: false,
            };
            entries.push(Entry {
                record: record.clone(),
                approved: None,
                instance: None,
                discarded: false,
            });
            record
        };
        debug!(vault_id = record.id, %kind, %owner, %registrar, "vault id reserved");
        Ok(record)
    }

    /// Attaches the live instance for `id` and announces the registration.
    /// Only the registrar may bind, and only once.
    pub fn bind(&self, registrar: Address, id: VaultId, instance: BoundVault) -> ProtocolResult<()> {
        let record = {
            let mut entries = self.entries.write();
            let entry = Self::live_mut(&mut entries, id)?;
            Self::check_registrar(entry, registrar)?;
            if entry.instance.is_some() {
                return Err(ProtocolError::Duplicate(format!("vault {id} is already bound")));
            }
            entry.instance = Some(instance);
            entry.record.clone()
        };
        info!(
            vault_id = id,
            kind = %record.kind,
            owner = %record.owner,
            %registrar,
            "vault registered"
        );
        self.metrics.vaults_registered_total.inc();
        self.events.emit(
            self.clock.now(),
            ProtocolEvent::VaultRegistered {
                vault_id: id,
                kind: record.kind,
                registrar,
                owner: record.owner,
            },
        );
        Ok(())
    }

    /// Drops a registration that never got bound. The id stays spent and
    /// reads as unknown afterwards.
    pub(crate) fn discard(&self, registrar: Address, id: VaultId) -> ProtocolResult<()> {
        let mut entries = self.entries.write();
        let entry = Self::live_mut(&mut entries, id)?;
        Self::check_registrar(entry, registrar)?;
        if entry.instance.is_some() {
            return Err(ProtocolError::Duplicate(format!("vault {id} is already bound")));
        }
        entry.discarded = true;
        entry.approved = None;
        warn!(vault_id = id, %registrar, "vault registration discarded");
        Ok(())
    }

    pub fn record(&self, id: VaultId) -> ProtocolResult<VaultRecord> {
        self.with_entry(id, |e| e.record.clone())
    }

    pub fn owner_of(&self, id: VaultId) -> ProtocolResult<Address> {
        self.with_entry(id, |e| e.record.owner)
    }

    pub fn get_approved(&self, id: VaultId) -> ProtocolResult<Option<Address>> {
        self.with_entry(id, |e| e.approved)
    }

    pub fn is_approved_for_all(&self, owner: Address, operator: Address) -> bool {
        self.operators.read().contains(&(owner, operator))
    }

    /// Owner, per-handle delegate, or operator of the owner.
    pub fn is_owner_or_approved(&self, id: VaultId, account: Address) -> bool {
        let (owner, approved) = match self.with_entry(id, |e| (e.record.owner, e.approved)) {
            Ok(pair) => pair,
            Err(_) => return false,
        };
        account == owner || approved == Some(account) || self.is_approved_for_all(owner, account)
    }

    /// The live instance bound to `id`.
    pub fn vault_for(&self, id: VaultId) -> ProtocolResult<BoundVault> {
        self.with_entry(id, |e| e.instance.clone())?
            .ok_or_else(|| ProtocolError::InvalidInterface {
                vault_id: id,
                reason: "no vault instance bound".into(),
            })
    }

    pub fn integration_vault(&self, id: VaultId) -> ProtocolResult<Arc<dyn IntegrationVault>> {
        match self.vault_for(id)? {
            BoundVault::Integration(vault) => Ok(vault),
            BoundVault::Root(_) => Err(ProtocolError::InvalidInterface {
                vault_id: id,
                reason: "root vaults cannot be custodians".into(),
            }),
        }
    }

    pub fn root_vault(&self, id: VaultId) -> ProtocolResult<Arc<RootVault>> {
        match self.vault_for(id)? {
            BoundVault::Root(vault) => Ok(vault),
            BoundVault::Integration(_) => Err(ProtocolError::InvalidInterface {
                vault_id: id,
                reason: "not a root vault".into(),
            }),
        }
    }

    /// `false` for unknown ids and for ids with no bound instance.
    pub fn supports_vault_interface(&self, id: VaultId, required: CapabilitySet) -> bool {
        self.vault_for(id)
            .map(|vault| vault.capabilities().contains(required))
            .unwrap_or(false)
    }

    /// Ids currently owned by `owner`.
    pub fn vaults_owned_by(&self, owner: Address) -> Vec<VaultId> {
        self.entries
            .read()
            .iter()
            .filter(|e| !e.discarded && e.record.owner == owner)
            .map(|e| e.record.id)
            .collect()
    }

    /// Sets (or with `None`, clears) the per-handle delegate.
    pub fn approve(&self, sender: Address, id: VaultId, delegate: Option<Address>) -> ProtocolResult<()> {
        let mut entries = self.entries.write();
        let entry = Self::live_mut(&mut entries, id)?;
        let owner = entry.record.owner;
        if sender != owner && !self.is_approved_for_all(owner, sender) {
            return Err(ProtocolError::forbidden(format!(
                "{sender} may not approve delegates for vault {id}"
            )));
        }
        entry.approved = delegate;
        debug!(vault_id = id, ?delegate, "vault delegate set");
        Ok(())
    }

    /// Sets the per-handle delegate on behalf of the registering governance.
    /// Used to hand a freshly created vault's strategy its authority.
    pub(crate) fn registrar_approve(
        &self,
        registrar: Address,
        id: VaultId,
        delegate: Address,
    ) -> ProtocolResult<()> {
        let mut entries = self.entries.write();
        let entry = Self::live_mut(&mut entries, id)?;
        Self::check_registrar(entry, registrar)?;
        entry.approved = Some(delegate);
        Ok(())
    }

    /// Grants or withdraws `operator` authority over all of `sender`'s handles.
    pub fn set_approval_for_all(&self, sender: Address, operator: Address, approved: bool) -> ProtocolResult<()> {
        if operator.is_zero() {
            return Err(ProtocolError::AddressZero("operator"));
        }
        if operator == sender {
            return Err(ProtocolError::invalid_value("cannot approve self as operator"));
        }
        let mut operators = self.operators.write();
        if approved {
            operators.insert((sender, operator));
        } else {
            operators.remove(&(sender, operator));
        }
        Ok(())
    }

    /// Moves a handle to `to`.
    pub fn transfer(&self, sender: Address, id: VaultId, to: Address) -> ProtocolResult<()> {
        if to.is_zero() {
            return Err(ProtocolError::AddressZero("vault recipient"));
        }
        let from = {
            let mut entries = self.entries.write();
            let entry = Self::live_mut(&mut entries, id)?;
            let owner = entry.record.owner;
            let authorized = sender == owner
                || entry.approved == Some(sender)
                || self.is_approved_for_all(owner, sender);
            if !authorized {
                return Err(ProtocolError::forbidden(format!(
                    "{sender} may not transfer vault {id}"
                )));
            }
            if entry.record.locked {
                return Err(ProtocolError::Locked(id));
            }
            entry.record.owner = to;
            entry.approved = None;
            owner
        };
        info!(vault_id = id, %from, %to, "vault transferred");
        self.events.emit(
            self.clock.now(),
            ProtocolEvent::VaultTransferred {
                vault_id: id,
                from,
                to,
            },
        );
        Ok(())
    }

    /// Makes a handle permanently non-transferable. Owner only.
    pub fn lock(&self, sender: Address, id: VaultId) -> ProtocolResult<()> {
        {
            let mut entries = self.entries.write();
            let entry = Self::live_mut(&mut entries, id)?;
            if entry.record.owner != sender {
                return Err(ProtocolError::forbidden(format!(
                    "only the owner may lock vault {id}"
                )));
            }
            if entry.record.locked {
                return Ok(());
            }
            entry.record.locked = true;
        }
        info!(vault_id = id, owner = %sender, "vault locked");
        self.events.emit(
            self.clock.now(),
            ProtocolEvent::VaultLocked {
                vault_id: id,
                owner: sender,
            },
        );
        Ok(())
    }
}

//! # Vaults
//!
//! Two kinds of vault live in KEEL:
//!
//! - **Integration vaults** (custodians) hold assets in some external venue
//!   and expose three capabilities: report holdings, accept assets, release
//!   assets. They know nothing about shares.
//! - **Root vaults** issue shares against a fixed set of custodians. See
//!   [`root`].
//!
//! Custodians may under-deliver on a pull or under-accept on a push; the
//! amounts actually moved are always reported back, and callers account for
//! those amounts, never for what they asked for.

pub mod callback;
pub mod family;
pub mod fees;
pub mod root;
pub mod shares;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tracing::debug;

use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::registry::VaultRecord;
use crate::types::{Address, Amount, AssetId, CapabilitySet, VaultId, VaultKind};

// ---------------------------------------------------------------------------
// Capability contract
// ---------------------------------------------------------------------------

/// The contract every custodian implements.
///
/// `push` and `pull` are only honoured for the owner (or an approved
/// delegate) of the vault's registry handle. Amount vectors are aligned
/// with the `assets` argument, which must be a subset of
/// [`assets`](IntegrationVault::assets).
pub trait IntegrationVault: Send + Sync {
    fn vault_id(&self) -> VaultId;

    fn kind(&self) -> VaultKind;

    /// Address the vault holds ledger balances at.
    fn address(&self) -> Address {
        Address::for_vault(self.vault_id())
    }

    /// The vault's asset set, strictly increasing.
    fn assets(&self) -> &[AssetId];

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::INTEGRATION
    }

    /// Current holdings per asset, in asset-set order.
    fn valuate(&self) -> ProtocolResult<Vec<(AssetId, Amount)>>;

    /// Takes up to `amounts` from `from` into custody. Returns what was
    /// actually accepted; anything not accepted stays with `from`.
    fn push(
        &self,
        sender: Address,
        from: Address,
        assets: &[AssetId],
        amounts: &[Amount],
        options: &[u8],
    ) -> ProtocolResult<Vec<Amount>>;

    /// Releases up to `amounts` to `to`. Returns what was actually sent,
    /// never more than requested.
    fn pull(
        &self,
        sender: Address,
        to: Address,
        assets: &[AssetId],
        amounts: &[Amount],
        options: &[u8],
    ) -> ProtocolResult<Vec<Amount>>;
}

// ---------------------------------------------------------------------------
// Shared custodian plumbing
// ---------------------------------------------------------------------------

/// Bookkeeping every custodian implementation needs: identity, asset set,
/// authorization and argument checks.
pub struct IntegrationCore {
    id: VaultId,
    kind: VaultKind,
    address: Address,
    assets: Vec<AssetId>,
    ctx: Arc<ProtocolContext>,
}

impl IntegrationCore {
    pub fn new(ctx: Arc<ProtocolContext>, record: &VaultRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            address: Address::for_vault(record.id),
            assets: record.assets.clone(),
            ctx,
        }
    }

    pub fn id(&self) -> VaultId {
        self.id
    }

    pub fn kind(&self) -> VaultKind {
        self.kind
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn ctx(&self) -> &Arc<ProtocolContext> {
        &self.ctx
    }

    /// `Forbidden` unless `sender` owns or is approved for this vault.
    pub fn ensure_authorized(&self, sender: Address) -> ProtocolResult<()> {
        if self.ctx.registry().is_owner_or_approved(self.id, sender) {
            Ok(())
        } else {
            Err(ProtocolError::forbidden(format!(
                "{sender} is not approved for vault {}",
                self.id
            )))
        }
    }

    /// Checks argument lengths and maps each requested asset to its index in
    /// the asset set.
    pub fn resolve(&self, assets: &[AssetId], amounts: &[Amount]) -> ProtocolResult<Vec<usize>> {
        if assets.len() != amounts.len() {
            return Err(ProtocolError::InvalidLength {
                expected: assets.len(),
                actual: amounts.len(),
            });
        }
        assets
            .iter()
            .map(|asset| {
                self.assets
                    .binary_search(asset)
                    .map_err(|_| ProtocolError::AssetNotSupported {
                        vault_id: self.id,
                        asset: *asset,
                    })
            })
            .collect()
    }

    /// Ledger balances held at the vault's address.
    pub fn ledger_holdings(&self) -> Vec<(AssetId, Amount)> {
        self.assets
            .iter()
            .map(|asset| (*asset, self.ctx.ledger().balance_of(*asset, self.address)))
            .collect()
    }

    /// Records a fill smaller than requested.
    pub fn note_fill(&self, operation: &'static str, requested: &[Amount], actual: &[Amount]) {
        if requested.iter().zip(actual).any(|(r, a)| a < r) {
            self.ctx.metrics().partial_fills_total.inc();
            debug!(vault_id = self.id, operation, ?requested, ?actual, "partial fill");
        }
    }
}

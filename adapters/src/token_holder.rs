//! # Token Holder Vault
//!
//! The simplest custodian: assets sit at the vault's own ledger address and
//! nothing else happens to them. Pushes are all-or-nothing per asset; pulls
//! release whatever is held, up to the request.

use std::sync::Arc;

use tracing::debug;

use keel_protocol::error::ProtocolResult;
use keel_protocol::governance::{VaultFamily, VaultGovernance};
use keel_protocol::registry::BoundVault;
use keel_protocol::types::{Address, Amount, AssetId, VaultId, VaultKind};
use keel_protocol::vault::{IntegrationCore, IntegrationVault};

pub type TokenHolderGovernance = VaultGovernance<TokenHolderFamily>;

/// Token holders have no parameters.
pub struct TokenHolderFamily;

impl VaultFamily for TokenHolderFamily {
    const KIND: VaultKind = VaultKind::TokenHolder;
    const NAME: &'static str = "TokenHolderVaultGovernance";
    const VERSION: &'static str = "1.0.0";

    type DelayedStrategyParams = ();
    type StrategyParams = ();
    type DelayedProtocolParams = ();
    type DelayedProtocolPerVaultParams = ();
    type OperatorParams = ();
}

pub struct TokenHolderVault {
    core: IntegrationCore,
}

impl TokenHolderVault {
    /// Creates a token holder over `assets`, owned by `owner`.
    pub fn create(
        governance: &TokenHolderGovernance,
        sender: Address,
        assets: Vec<AssetId>,
        owner: Address,
    ) -> ProtocolResult<Arc<TokenHolderVault>> {
        let ctx = governance.ctx().clone();
        governance.create_vault(sender, assets, owner, |record| {
            let vault = Arc::new(TokenHolderVault {
                core: IntegrationCore::new(ctx, record),
            });
            Ok((vault.clone(), BoundVault::Integration(vault)))
        })
    }
}

impl IntegrationVault for TokenHolderVault {
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
        Ok(self.core.ledger_holdings())
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
        let ledger = self.core.ctx().ledger();
        for (asset, amount) in assets.iter().zip(amounts) {
            ledger.transfer(*asset, from, self.core.address(), *amount)?;
        }
        debug!(vault_id = self.core.id(), ?amounts, "token holder push");
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
        let ledger = self.core.ctx().ledger();
        let mut actual = Vec::with_capacity(amounts.len());
        for (asset, amount) in assets.iter().zip(amounts) {
            let sent = (*amount).min(ledger.balance_of(*asset, self.core.address()));
            ledger.transfer(*asset, self.core.address(), to, sent)?;
            actual.push(sent);
        }
        self.core.note_fill("pull", amounts, &actual);
        Ok(actual)
    }
}

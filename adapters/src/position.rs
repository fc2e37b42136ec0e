//! # Liquidity Position Vault
//!
//! Custody in a two-asset liquidity position. The position owns reserves of
//! both assets and issues internal liquidity units against them; it can
//! only grow or shrink in its current reserve ratio. That makes it a
//! natural source of partial fills:
//!
//! - a push accepts the largest slice of the offer that matches the ratio
//!   and leaves the rest with the sender,
//! - a pull burns liquidity for the scarcest requested asset and returns
//!   both assets proportionally.
//!
//! Trading fees land in the reserves without minting liquidity, so they
//! show up as value growth to whoever holds the vault.
//!
//! Push and pull options, when present, are a 16-byte big-endian minimum
//! amount of liquidity the call must mint or burn.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use keel_protocol::error::{ProtocolError, ProtocolResult};
use keel_protocol::governance::{VaultFamily, VaultGovernance};
use keel_protocol::math::mul_div;
use keel_protocol::registry::BoundVault;
use keel_protocol::types::{Address, Amount, AssetId, VaultId, VaultKind};
use keel_protocol::vault::{IntegrationCore, IntegrationVault};

pub type PositionGovernance = VaultGovernance<PositionFamily>;

pub struct PositionFamily;

/// Family-wide, timelocked: the manager positions are opened through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionDelayedProtocolParams {
    pub position_manager: Address,
}

impl VaultFamily for PositionFamily {
    const KIND: VaultKind = VaultKind::LiquidityPosition;
    const NAME: &'static str = "PositionVaultGovernance";
    const VERSION: &'static str = "1.0.0";

    type DelayedStrategyParams = ();
    type StrategyParams = ();
    type DelayedProtocolParams = PositionDelayedProtocolParams;
    type DelayedProtocolPerVaultParams = ();
    type OperatorParams = ();

    fn validate_delayed_protocol_params(params: &PositionDelayedProtocolParams) -> ProtocolResult<()> {
        if params.position_manager.is_zero() {
            return Err(ProtocolError::AddressZero("position manager"));
        }
        Ok(())
    }
}

/// Reads the optional minimum-liquidity option.
fn min_liquidity(options: &[u8]) -> ProtocolResult<Amount> {
    match options.len() {
        0 => Ok(0),
        16 => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(options);
            Ok(u128::from_be_bytes(bytes))
        }
        n => Err(ProtocolError::InvalidLength {
            expected: 16,
            actual: n,
        }),
    }
}

pub struct PositionVault {
    core: IntegrationCore,
    manager: Address,
    liquidity: Mutex<Amount>,
}

impl PositionVault {
    /// Opens an empty position over exactly two assets.
    pub fn create(
        governance: &PositionGovernance,
        sender: Address,
        assets: Vec<AssetId>,
        owner: Address,
    ) -> ProtocolResult<Arc<PositionVault>> {
        if assets.len() != 2 {
            return Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: assets.len(),
            });
        }
        let manager = governance.delayed_protocol_params().position_manager;
        if manager.is_zero() {
            return Err(ProtocolError::AddressZero("position manager"));
        }
        let ctx = governance.ctx().clone();
        governance.create_vault(sender, assets, owner, |record| {
            let vault = Arc::new(PositionVault {
                core: IntegrationCore::new(ctx, record),
                manager,
                liquidity: Mutex::new(0),
            });
            Ok((vault.clone(), BoundVault::Integration(vault)))
        })
    }

    pub fn manager(&self) -> Address {
        self.manager
    }

    /// Outstanding liquidity units.
    pub fn liquidity(&self) -> Amount {
        *self.liquidity.lock()
    }

    fn reserves(&self) -> [Amount; 2] {
        let ledger = self.core.ctx().ledger();
        let assets = self.core.assets();
        [
            ledger.balance_of(assets[0], self.core.address()),
            ledger.balance_of(assets[1], self.core.address()),
        ]
    }

    /// Aligns `amounts` (given for `assets`) to the position's asset order.
    fn aligned(&self, assets: &[AssetId], amounts: &[Amount]) -> ProtocolResult<[Amount; 2]> {
        let indices = self.core.resolve(assets, amounts)?;
        let mut out = [0; 2];
        for (i, amount) in indices.into_iter().zip(amounts) {
            out[i] = *amount;
        }
        Ok(out)
    }

    fn scatter(assets: &[AssetId], own: &[AssetId], values: [Amount; 2]) -> Vec<Amount> {
        assets
            .iter()
            .map(|a| if *a == own[0] { values[0] } else { values[1] })
            .collect()
    }

    /// Simulates trading fees: mints `amounts` straight into the reserves.
    /// Manager only.
    pub fn collect_fees(&self, sender: Address, amounts: [Amount; 2]) -> ProtocolResult<()> {
        if sender != self.manager {
            return Err(ProtocolError::forbidden(format!(
                "{sender} is not the position manager"
            )));
        }
        let ledger = self.core.ctx().ledger();
        for (asset, amount) in self.core.assets().iter().zip(amounts) {
            ledger.mint(*asset, self.core.address(), amount)?;
        }
        info!(vault_id = self.core.id(), ?amounts, "position fees collected");
        Ok(())
    }
}

impl IntegrationVault for PositionVault {
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
        options: &[u8],
    ) -> ProtocolResult<Vec<Amount>> {
        self.core.ensure_authorized(sender)?;
        let offered = self.aligned(assets, amounts)?;
        let minimum = min_liquidity(options)?;

        let mut liquidity = self.liquidity.lock();
        let reserves = self.reserves();
        let (accepted, minted) = if *liquidity == 0 || reserves.contains(&0) {
            (offered, offered[0].max(offered[1]))
        } else {
            let minted = mul_div(offered[0], *liquidity, reserves[0])?
                .min(mul_div(offered[1], *liquidity, reserves[1])?);
            let accepted = [
                mul_div(reserves[0], minted, *liquidity)?.min(offered[0]),
                mul_div(reserves[1], minted, *liquidity)?.min(offered[1]),
            ];
            (accepted, minted)
        };
        if minted < minimum {
            return Err(ProtocolError::LimitUnderflow {
                what: "liquidity minted",
                actual: minted,
                minimum,
            });
        }

        let ledger = self.core.ctx().ledger();
        for (asset, amount) in self.core.assets().iter().zip(accepted) {
            ledger.transfer(*asset, from, self.core.address(), amount)?;
        }
        *liquidity += minted;
        let accepted = Self::scatter(assets, self.core.assets(), accepted);
        self.core.note_fill("push", amounts, &accepted);
        debug!(vault_id = self.core.id(), minted, ?accepted, "position increased");
        Ok(accepted)
    }

    fn pull(
        &self,
        sender: Address,
        to: Address,
        assets: &[AssetId],
        amounts: &[Amount],
        options: &[u8],
    ) -> ProtocolResult<Vec<Amount>> {
        self.core.ensure_authorized(sender)?;
        let requested = self.aligned(assets, amounts)?;
        let minimum = min_liquidity(options)?;

        let mut liquidity = self.liquidity.lock();
        let reserves = self.reserves();
        if *liquidity == 0 {
            return Ok(vec![0; amounts.len()]);
        }
        // Burn enough for the scarcest requested asset.
        let mut burned: Option<Amount> = None;
        for (want, reserve) in requested.iter().zip(reserves) {
            if *want == 0 || reserve == 0 {
                continue;
            }
            let l = mul_div(*want, *liquidity, reserve)?;
            burned = Some(burned.map_or(l, |b| b.min(l)));
        }
        let burned = burned.unwrap_or(0).min(*liquidity);
        if burned < minimum {
            return Err(ProtocolError::LimitUnderflow {
                what: "liquidity burned",
                actual: burned,
                minimum,
            });
        }
        let released = [
            mul_div(reserves[0], burned, *liquidity)?.min(requested[0]),
            mul_div(reserves[1], burned, *liquidity)?.min(requested[1]),
        ];

        let ledger = self.core.ctx().ledger();
        for (asset, amount) in self.core.assets().iter().zip(released) {
            ledger.transfer(*asset, self.core.address(), to, amount)?;
        }
        *liquidity -= burned;
        let released = Self::scatter(assets, self.core.assets(), released);
        self.core.note_fill("pull", amounts, &released);
        debug!(vault_id = self.core.id(), burned, ?released, "position decreased");
        Ok(released)
    }
}

//! Root vault family: parameter tiers and their validation.

use serde::{Deserialize, Serialize};

use crate::config::MAX_MANAGEMENT_FEE_CHARGE_DELAY;
use crate::error::{ProtocolError, ProtocolResult};
use crate::governance::protocol::ProtocolParams;
use crate::governance::vault::{VaultFamily, VaultGovernance};
use crate::types::{Address, Amount, VaultKind};

/// Governance for root vaults.
pub type RootVaultGovernance = VaultGovernance<RootVaultFamily>;

pub struct RootVaultFamily;

/// Per-vault, timelocked. Everything that decides where value goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDelayedStrategyParams {
    /// Receives management fee shares.
    pub strategy_treasury: Address,
    /// Receives performance fee shares.
    pub strategy_performance_treasury: Address,
    /// When set, only allow-listed depositors may deposit.
    pub private_vault: bool,
    /// Annual management fee, in fee denominator units.
    pub management_fee: u64,
    /// Share of gains above the high-water-mark, in fee denominator units.
    pub performance_fee: u64,
    pub deposit_callback: Option<Address>,
    pub withdraw_callback: Option<Address>,
}

/// Per-vault, immediate. Deposit caps only; zero closes the vault to new
/// shares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootStrategyParams {
    pub token_limit_per_address: Amount,
    pub token_limit: Amount,
}

impl Default for RootStrategyParams {
    fn default() -> Self {
        Self {
            token_limit_per_address: Amount::MAX,
            token_limit: Amount::MAX,
        }
    }
}

/// Family-wide, timelocked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDelayedProtocolParams {
    /// Fees are not charged more often than this many seconds.
    pub management_fee_charge_delay: u64,
}

/// Per-vault, timelocked, admin-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDelayedProtocolPerVaultParams {
    /// Annual protocol fee, in fee denominator units.
    pub protocol_fee: u64,
}

/// Family-wide, immediate kill switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootOperatorParams {
    pub disable_deposit: bool,
}

fn check_fee(what: &'static str, fee: u64, limit: u64) -> ProtocolResult<()> {
    if fee > limit {
        return Err(ProtocolError::LimitOverflow {
            what,
            requested: fee.into(),
            limit: limit.into(),
        });
    }
    Ok(())
}

impl VaultFamily for RootVaultFamily {
    const KIND: VaultKind = VaultKind::Root;
    const NAME: &'static str = "RootVaultGovernance";
    const VERSION: &'static str = "1.0.0";

    type DelayedStrategyParams = RootDelayedStrategyParams;
    type StrategyParams = RootStrategyParams;
    type DelayedProtocolParams = RootDelayedProtocolParams;
    type DelayedProtocolPerVaultParams = RootDelayedProtocolPerVaultParams;
    type OperatorParams = RootOperatorParams;

    /// Fees off, both treasuries pointed at the owner, public vault.
    fn initial_delayed_strategy_params(owner: Address) -> RootDelayedStrategyParams {
        RootDelayedStrategyParams {
            strategy_treasury: owner,
            strategy_performance_treasury: owner,
            ..RootDelayedStrategyParams::default()
        }
    }

    fn validate_delayed_strategy_params(
        params: &RootDelayedStrategyParams,
        protocol: &ProtocolParams,
    ) -> ProtocolResult<()> {
        if params.strategy_treasury.is_zero() {
            return Err(ProtocolError::AddressZero("strategy treasury"));
        }
        if params.strategy_performance_treasury.is_zero() {
            return Err(ProtocolError::AddressZero("strategy performance treasury"));
        }
        check_fee("management fee", params.management_fee, protocol.max_management_fee)?;
        check_fee("performance fee", params.performance_fee, protocol.max_performance_fee)?;
        for callback in [params.deposit_callback, params.withdraw_callback].into_iter().flatten() {
            if callback.is_zero() {
                return Err(ProtocolError::AddressZero("callback"));
            }
        }
        Ok(())
    }

    fn validate_delayed_protocol_params(params: &RootDelayedProtocolParams) -> ProtocolResult<()> {
        if params.management_fee_charge_delay > MAX_MANAGEMENT_FEE_CHARGE_DELAY {
            return Err(ProtocolError::LimitOverflow {
                what: "management fee charge delay",
                requested: params.management_fee_charge_delay.into(),
                limit: MAX_MANAGEMENT_FEE_CHARGE_DELAY.into(),
            });
        }
        Ok(())
    }

    fn validate_delayed_protocol_per_vault_params(
        params: &RootDelayedProtocolPerVaultParams,
        protocol: &ProtocolParams,
    ) -> ProtocolResult<()> {
        check_fee("protocol fee", params.protocol_fee, protocol.max_protocol_fee)
    }
}

//! # Fee Accrual
//!
//! Fees are paid in freshly minted shares, never by moving assets:
//!
//! - **management** — `fee · elapsed · supply / (year · denominator)` to the
//!   strategy treasury,
//! - **protocol** — same formula with the per-vault protocol fee, to the
//!   protocol treasury,
//! - **performance** — a cut of value-per-share growth above the
//!   high-water-mark, to the performance treasury.
//!
//! Value per share is tracked per asset (`tvl_i · 1e18 / supply`). Growth is
//! the smallest per-asset ratio against the mark, so a gain in one asset
//! cannot hide a loss in another. The mark only ever moves up.
//!
//! Everything here is pure: the root vault previews a [`FeeCharge`], prices
//! deposits and withdrawals against it, and applies it only once the
//! operation is certain to succeed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{D18, FEE_DENOMINATOR, SECONDS_PER_YEAR};
use crate::error::ProtocolResult;
use crate::math::mul_div;
use crate::types::{Address, Amount, Timestamp};

/// Fee configuration in force at charge time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeSchedule {
    pub management_fee: u64,
    pub performance_fee: u64,
    pub protocol_fee: u64,
    /// Minimum seconds between charges.
    pub charge_delay: u64,
    pub strategy_treasury: Address,
    pub performance_treasury: Address,
    pub protocol_treasury: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeKind {
    Management,
    Protocol,
    Performance,
}

/// Shares to mint to one treasury.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeMint {
    pub kind: FeeKind,
    pub treasury: Address,
    pub fee: u64,
    pub shares: Amount,
}

/// The outcome of a fee preview.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeCharge {
    /// `Some(now)` if the charge timestamp should move.
    pub charged_at: Option<Timestamp>,
    pub mints: Vec<FeeMint>,
    /// New high-water-mark, if it should change.
    pub high_water_mark: Option<Vec<u128>>,
}

impl FeeCharge {
    /// Total shares this charge mints.
    pub fn total_shares(&self) -> Amount {
        self.mints.iter().map(|m| m.shares).sum()
    }
}

/// `tvl_i · 1e18 / supply` for each asset. Zero supply has no price.
pub fn value_per_share(tvl: &[Amount], supply: Amount) -> ProtocolResult<Vec<u128>> {
    if supply == 0 {
        return Ok(vec![0; tvl.len()]);
    }
    tvl.iter().map(|t| mul_div(*t, D18, supply)).collect()
}

fn annualized(fee: u64, elapsed: u64, supply: Amount) -> ProtocolResult<Amount> {
    let rate = u128::from(fee) * u128::from(elapsed);
    let denominator = u128::from(SECONDS_PER_YEAR) * u128::from(FEE_DENOMINATOR);
    mul_div(supply, rate, denominator)
}

/// Previews the fees due at `now`.
pub fn compute_fees(
    schedule: &FeeSchedule,
    last_charge: Timestamp,
    now: Timestamp,
    supply: Amount,
    tvl: &[Amount],
    high_water_mark: &[u128],
) -> ProtocolResult<FeeCharge> {
    let elapsed = now.saturating_sub(last_charge);
    if elapsed < schedule.charge_delay {
        return Ok(FeeCharge::default());
    }
    let mut charge = FeeCharge {
        charged_at: Some(now),
        ..FeeCharge::default()
    };
    if supply == 0 {
        return Ok(charge);
    }

    let annual = [
        (FeeKind::Management, schedule.management_fee, schedule.strategy_treasury),
        (FeeKind::Protocol, schedule.protocol_fee, schedule.protocol_treasury),
    ];
    for (kind, fee, treasury) in annual {
        if fee == 0 || treasury.is_zero() || elapsed == 0 {
            continue;
        }
        let shares = annualized(fee, elapsed, supply)?;
        if shares > 0 {
            charge.mints.push(FeeMint {
                kind,
                treasury,
                fee,
                shares,
            });
        }
    }

    let pps = value_per_share(tvl, supply)?;
    if high_water_mark.len() != pps.len() {
        // First observation (or asset set changed shape): seed the mark.
        charge.high_water_mark = Some(pps);
        return Ok(charge);
    }

    let mut growth: Option<u128> = None;
    for (p, h) in pps.iter().zip(high_water_mark) {
        if *h > 0 {
            let ratio = mul_div(*p, D18, *h)?;
            growth = Some(growth.map_or(ratio, |g| g.min(ratio)));
        }
    }
    let raised: Vec<u128> = pps
        .iter()
        .zip(high_water_mark)
        .map(|(p, h)| (*p).max(*h))
        .collect();

    match growth {
        Some(g) if g > D18 => {
            let fee = schedule.performance_fee;
            let treasury = schedule.performance_treasury;
            if fee > 0 && !treasury.is_zero() {
                let gained = mul_div(supply, g - D18, D18)?;
                let shares = mul_div(gained, u128::from(fee), u128::from(FEE_DENOMINATOR))?;
                debug!(growth = %g, shares, "performance fee above high-water-mark");
                if shares > 0 {
                    charge.mints.push(FeeMint {
                        kind: FeeKind::Performance,
                        treasury,
                        fee,
                        shares,
                    });
                }
            }
            charge.high_water_mark = Some(raised);
        }
        None if raised.as_slice() != high_water_mark => {
            charge.high_water_mark = Some(raised);
        }
        _ => {}
    }
    Ok(charge)
}

//! # Protocol Configuration & Constants
//!
//! Every magic number in KEEL lives here. Fee rates are expressed in parts of
//! [`FEE_DENOMINATOR`], fixed-point prices in parts of [`D18`], times in unix
//! seconds. If a number shows up inline somewhere else, move it here.

use crate::types::Amount;

// ---------------------------------------------------------------------------
// Fixed-point scales
// ---------------------------------------------------------------------------

/// Denominator for every fee rate. `10_000_000` is 1 %, `1e9` is 100 %.
pub const FEE_DENOMINATOR: u64 = 1_000_000_000;

/// Scale for value-per-share figures and other 18-decimal fixed-point values.
pub const D18: u128 = 1_000_000_000_000_000_000;

/// Seconds in a (non-leap) year. Management fees are annualized over this.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Root vault limits
// ---------------------------------------------------------------------------

/// Every asset of the very first deposit into an empty root vault must be
/// strictly above this. Keeps share prices away from dust-level rounding
/// games on bootstrap.
pub const FIRST_DEPOSIT_LIMIT: Amount = 10_000;

/// Hard ceiling for the per-vault management fee (10 % a year).
pub const MAX_MANAGEMENT_FEE: u64 = 100_000_000;

/// Hard ceiling for the performance fee (50 % of gains above the mark).
pub const MAX_PERFORMANCE_FEE: u64 = 500_000_000;

/// Hard ceiling for the per-vault protocol fee (5 % a year).
pub const MAX_PROTOCOL_FEE: u64 = 50_000_000;

/// Upper bound on how long fee charging may be deferred between operations.
pub const MAX_MANAGEMENT_FEE_CHARGE_DELAY: u64 = 24 * 60 * 60;

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

/// Default waiting period between staging and committing a parameter change.
pub const DEFAULT_GOVERNANCE_DELAY: u64 = 24 * 60 * 60;

/// A delay longer than a week would let governance freeze itself in practice.
pub const MAX_GOVERNANCE_DELAY: u64 = 7 * 24 * 60 * 60;

/// Default cap on the number of assets in one vault's asset set.
pub const DEFAULT_MAX_TOKENS_PER_VAULT: usize = 10;

/// First id handed out by the ownership registry. Zero is never a vault.
pub const FIRST_VAULT_ID: u64 = 1;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Capacity of the live event broadcast channel. Slow subscribers that fall
/// further behind than this see `Lagged` and should re-read the journal.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

//! # Protocol Errors
//!
//! One error type for the whole protocol surface. Every kind is a separate
//! variant so callers (and tests) can tell a timelock that hasn't elapsed
//! from an allow-list rejection without parsing strings.

use thiserror::Error;

use crate::types::{Address, Amount, AssetId, Timestamp, VaultId};

/// Convenience alias used by every fallible protocol operation.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Everything that can go wrong inside KEEL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The caller lacks the role, ownership or allow-list entry required.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A quantity that must be non-zero was zero.
    #[error("value must be non-zero: {0}")]
    ValueZero(&'static str),

    /// A quantity fell below its required minimum.
    #[error("limit underflow: {what} is {actual}, minimum {minimum}")]
    LimitUnderflow {
        /// What was being checked.
        what: &'static str,
        /// The offending value.
        actual: Amount,
        /// The bound it had to reach.
        minimum: Amount,
    },

    /// A quantity exceeded its permitted maximum.
    #[error("limit overflow: {what} would be {requested}, limit {limit}")]
    LimitOverflow {
        /// What was being checked.
        what: &'static str,
        /// The value the operation would produce.
        requested: Amount,
        /// The bound it must not exceed.
        limit: Amount,
    },

    /// Two parallel sequences disagree in length.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// A list that must contain at least one element was empty.
    #[error("empty list: {0}")]
    EmptyList(&'static str),

    /// An element appeared twice where uniqueness is required.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The zero address was supplied where a real party is required.
    #[error("zero address supplied for {0}")]
    AddressZero(&'static str),

    /// A referenced vault does not offer the capabilities the caller needs.
    #[error("vault {vault_id} has an invalid interface: {reason}")]
    InvalidInterface {
        /// The vault that failed the check.
        vault_id: VaultId,
        /// Which capability or property was missing.
        reason: String,
    },

    /// A staged value was committed before its waiting period elapsed.
    #[error("timelock not elapsed: committable at {ready_at}, now {now}")]
    TimelockNotElapsed {
        /// Earliest time the commit succeeds.
        ready_at: Timestamp,
        /// The time the commit was attempted.
        now: Timestamp,
    },

    /// Commit or cancel with no staged value.
    #[error("nothing staged")]
    NothingStaged,

    /// The id was never handed out, or belongs to another vault family.
    #[error("unknown vault {0}")]
    UnknownVault(VaultId),

    /// A custodian was asked to move an asset outside its asset set.
    #[error("asset {asset} is not supported by vault {vault_id}")]
    AssetNotSupported {
        /// The vault asked.
        vault_id: VaultId,
        /// The asset it does not hold.
        asset: AssetId,
    },

    /// An ordering or uniqueness invariant does not hold.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// A parameter failed validation.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A holder tried to move more of an asset than it owns.
    #[error("insufficient balance of {asset} at {holder}: available {available}, requested {requested}")]
    InsufficientBalance {
        /// The asset being moved.
        asset: AssetId,
        /// The holder being debited.
        holder: Address,
        /// Current balance.
        available: Amount,
        /// Attempted debit.
        requested: Amount,
    },

    /// The ownership handle is locked and cannot move.
    #[error("vault {0} is locked")]
    Locked(VaultId),

    /// Checked arithmetic overflowed.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::Forbidden`].
    pub fn forbidden(reason: impl Into<String>) -> Self {
        ProtocolError::Forbidden(reason.into())
    }

    /// Shorthand for [`ProtocolError::InvalidValue`].
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        ProtocolError::InvalidValue(reason.into())
    }
}

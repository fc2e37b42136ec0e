// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # KEEL Protocol — Core Library
//!
//! KEEL pools user deposits into a single share-denominated root vault and
//! spreads the assets over a fixed set of custodian vaults (token holders,
//! lending pools, liquidity positions). Share holders can always get their
//! pro-rata slice back out, and nobody — strategy owners included — can
//! change the fees or the rules under them without a public waiting period.
//!
//! ## Architecture
//!
//! - **governance** — Timelocked parameter slots, protocol-wide governance
//!   (roles, permissions, limits) and per-family vault governance.
//! - **registry** — Ownership handles for every vault. Transferable,
//!   delegable, lockable. Who holds the handle controls the vault.
//! - **vault** — The custodian capability contract, the root vault with its
//!   share accounting, fee accrual and depositor callbacks.
//! - **ledger** — The host asset ledger the protocol moves funds on.
//! - **events** / **metrics** / **telemetry** — What happened, how often,
//!   and the log output around it.
//! - **version** — `major.minor.patch` packing for component versions.
//! - **config** — Protocol constants.
//!
//! ## Design Philosophy
//!
//! 1. Every parameter that moves money changes only through a timelock.
//! 2. A misbehaving custodian costs you a partial fill, never an invariant.
//! 3. All `a * b / c` math runs through 256 bits. Overflow is an error,
//!    not a surprise.
//! 4. If it touches shares, it has tests. Plural.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod governance;
pub mod ledger;
pub mod math;
pub mod metrics;
pub mod registry;
pub mod telemetry;
pub mod types;
pub mod vault;
pub mod version;

pub use context::ProtocolContext;
pub use error::{ProtocolError, ProtocolResult};
pub use types::{Address, Amount, AssetId, Timestamp, VaultId, VaultKind};

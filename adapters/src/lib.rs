// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # KEEL Adapters
//!
//! Reference custodians that plug into a KEEL root vault through the
//! [`IntegrationVault`](keel_protocol::vault::IntegrationVault) contract:
//!
//! - **Token holder** — keeps assets idle at its own ledger address.
//! - **Lending** — supplies assets to an in-process money market and earns
//!   its liquidity index. Pulls are capped by the pool's free liquidity.
//! - **Liquidity position** — a two-asset position that only accepts and
//!   releases assets in its current reserve ratio.
//!
//! Each adapter comes with its own vault family, so it is created and
//! governed through a [`VaultGovernance`](keel_protocol::governance::VaultGovernance)
//! like any other vault.

pub mod lending;
pub mod position;
pub mod token_holder;

pub use lending::{LendingError, LendingFamily, LendingGovernance, LendingPool, LendingVault};
pub use position::{PositionFamily, PositionGovernance, PositionVault};
pub use token_holder::{TokenHolderFamily, TokenHolderGovernance, TokenHolderVault};

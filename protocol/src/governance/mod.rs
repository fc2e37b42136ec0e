//! # Governance
//!
//! - [`params`] — the timelocked slot every governed value lives in.
//! - [`protocol`] — protocol-wide roles, parameters and permissions.
//! - [`vault`] — per-family vault governance: vault creation and the five
//!   parameter tiers (delayed strategy, strategy, delayed protocol, delayed
//!   protocol per vault, operator).

pub mod params;
pub mod protocol;
pub mod vault;

pub use params::{ParamSlot, ParameterStore, SlotState};
pub use protocol::{PermissionSet, ProtocolGovernance, ProtocolParams, Role};
pub use vault::{ParamValue, VaultFamily, VaultGovernance};

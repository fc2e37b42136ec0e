//! # Core Types
//!
//! Addresses, ids and the handful of enums every other module leans on.
//!
//! Amounts are plain `u128` in the asset's smallest unit. Asset ids are
//! addresses, and the canonical order of an asset set is byte order of
//! those addresses, so "sorted" means the same thing everywhere.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// Quantity of an asset (or of root vault shares) in smallest units.
pub type Amount = u128;

/// Unix time in seconds.
pub type Timestamp = u64;

/// Identifier handed out by the ownership registry. Starts at 1.
pub type VaultId = u64;

/// Assets are identified by the address of their ledger entry.
pub type AssetId = Address;

/// Length of an address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account identifier: users, treasuries, vaults and assets all
/// live in the same address space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The zero address. Never a valid owner, treasury or recipient.
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Wraps raw bytes.
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Address(bytes)
    }

    /// Deterministic address derived from a label, handy for fixtures and
    /// well-known component addresses.
    pub fn from_label(label: &str) -> Self {
        Self::derive(b"keel/label/", label.as_bytes())
    }

    /// The address a vault holds assets at. Derived from its registry id so
    /// it is known before the vault instance exists.
    pub fn for_vault(id: VaultId) -> Self {
        Self::derive(b"keel/vault/", &id.to_be_bytes())
    }

    /// A fresh random address.
    pub fn random() -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        rand::thread_rng().fill_bytes(&mut bytes);
        Address(bytes)
    }

    fn derive(domain: &[u8], data: &[u8]) -> Self {
        let digest = Sha256::new().chain_update(domain).chain_update(data).finalize();
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[..ADDRESS_LENGTH]);
        Address(bytes)
    }

    /// Returns `true` for [`Address::ZERO`].
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses `0x`-prefixed (or bare) hex.
    pub fn from_hex(s: &str) -> Result<Self, ProtocolError> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let decoded = hex::decode(trimmed)
            .map_err(|e| ProtocolError::invalid_value(format!("address {s}: {e}")))?;
        let bytes: [u8; ADDRESS_LENGTH] = decoded.try_into().map_err(|v: Vec<u8>| {
            ProtocolError::invalid_value(format!("address {s}: expected 20 bytes, got {}", v.len()))
        })?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Vault kinds & capabilities
// ---------------------------------------------------------------------------

/// The family a registered vault belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaultKind {
    /// Pooled, share-issuing vault over a set of sub-vaults.
    Root,
    /// Holds assets as plain ledger balances.
    TokenHolder,
    /// Supplies assets to a lending market.
    Lending,
    /// Provides liquidity in a two-asset position.
    LiquidityPosition,
}

impl fmt::Display for VaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultKind::Root => write!(f, "root"),
            VaultKind::TokenHolder => write!(f, "token-holder"),
            VaultKind::Lending => write!(f, "lending"),
            VaultKind::LiquidityPosition => write!(f, "liquidity-position"),
        }
    }
}

/// A single thing a vault can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Valuate,
    Pull,
    Push,
    Deposit,
    Withdraw,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Capability::Valuate => 1 << 0,
            Capability::Pull => 1 << 1,
            Capability::Push => 1 << 2,
            Capability::Deposit => 1 << 3,
            Capability::Withdraw => 1 << 4,
        }
    }
}

/// A set of [`Capability`] values, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    /// What every custodian must offer to sit under a root vault.
    pub const INTEGRATION: CapabilitySet = CapabilitySet(0b0_0111);

    /// What a root vault offers.
    pub const ROOT: CapabilitySet = CapabilitySet(0b1_1001);

    /// Builds a set from individual capabilities.
    pub fn of(capabilities: &[Capability]) -> Self {
        CapabilitySet(capabilities.iter().fold(0, |acc, c| acc | c.bit()))
    }

    /// Returns `true` if `capability` is in the set.
    pub fn has(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Returns `true` if every member of `other` is in this set.
    pub fn contains(&self, other: CapabilitySet) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Returns `true` if `assets` is strictly increasing (sorted, no repeats).
pub fn is_sorted_and_unique(assets: &[AssetId]) -> bool {
    assets.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_address() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::from_label("alice").is_zero());
        assert_eq!(Address::default(), Address::ZERO);
    }

    #[test]
    fn test_hex_round_trip() {
        let addr = Address::from_label("treasury");
        let parsed: Address = addr.to_hex().parse().unwrap();
        assert_eq!(parsed, addr);
        assert!(addr.to_string().starts_with("0x"));
        assert_eq!(addr.to_hex().len(), 2 + 2 * ADDRESS_LENGTH);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(matches!(
            Address::from_hex("0xdeadbeef"),
            Err(ProtocolError::InvalidValue(_))
        ));
        assert!(Address::from_hex("0xnothex").is_err());
    }

    #[test]
    fn test_vault_addresses_are_deterministic_and_distinct() {
        assert_eq!(Address::for_vault(7), Address::for_vault(7));
        assert_ne!(Address::for_vault(7), Address::for_vault(8));
        assert_ne!(Address::for_vault(1), Address::from_label("1"));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let addr = Address::from_label("bob");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    #[test]
    fn test_capability_sets() {
        assert!(CapabilitySet::INTEGRATION.has(Capability::Pull));
        assert!(CapabilitySet::INTEGRATION.has(Capability::Push));
        assert!(!CapabilitySet::INTEGRATION.has(Capability::Deposit));
        assert!(CapabilitySet::ROOT.has(Capability::Withdraw));
        assert!(!CapabilitySet::ROOT.contains(CapabilitySet::INTEGRATION));
        assert_eq!(
            CapabilitySet::of(&[Capability::Valuate, Capability::Pull, Capability::Push]),
            CapabilitySet::INTEGRATION
        );
    }

    #[test]
    fn test_sorted_and_unique() {
        let mut assets = vec![Address::from_label("a"), Address::from_label("b")];
        assets.sort();
        assert!(is_sorted_and_unique(&assets));
        assets.reverse();
        assert!(!is_sorted_and_unique(&assets));
        assert!(!is_sorted_and_unique(&[assets[0], assets[0]]));
        assert!(is_sorted_and_unique(&[]));
    }
}

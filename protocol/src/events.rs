//! # Protocol Events
//!
//! Every externally meaningful state change emits a [`ProtocolEvent`]. The
//! [`EventLog`] keeps the full journal (for audits and tests) and fans each
//! record out over a `tokio` broadcast channel for live subscribers.
//!
//! Governance events carry their parameter payload as JSON so one event type
//! covers every vault family's parameter structs.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::governance::protocol::{PermissionSet, Role};
use crate::types::{Address, Amount, Timestamp, VaultId, VaultKind};

/// Which parameter tier a cancelled stage belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamTier {
    Protocol,
    DelayedStrategy,
    DelayedProtocol,
    DelayedProtocolPerVault,
    PermissionGrants,
}

/// Everything KEEL tells the outside world about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    // --- Root vault ------------------------------------------------------
    Deposit {
        vault_id: VaultId,
        depositor: Address,
        assets: Vec<Address>,
        amounts: Vec<Amount>,
        shares: Amount,
    },
    Withdraw {
        vault_id: VaultId,
        sender: Address,
        recipient: Address,
        assets: Vec<Address>,
        amounts: Vec<Amount>,
        shares: Amount,
    },
    ManagementFeesCharged {
        vault_id: VaultId,
        treasury: Address,
        fee: u64,
        shares: Amount,
    },
    ProtocolFeesCharged {
        vault_id: VaultId,
        treasury: Address,
        fee: u64,
        shares: Amount,
    },
    PerformanceFeesCharged {
        vault_id: VaultId,
        treasury: Address,
        fee: u64,
        shares: Amount,
    },
    DepositorsAllowlisted {
        vault_id: VaultId,
        sender: Address,
        depositors: Vec<Address>,
    },
    DepositorsRemoved {
        vault_id: VaultId,
        sender: Address,
        depositors: Vec<Address>,
    },
    SharesTransferred {
        vault_id: VaultId,
        from: Address,
        to: Address,
        shares: Amount,
    },
    Rebalanced {
        vault_id: VaultId,
        sender: Address,
        from_vault: VaultId,
        to_vault: VaultId,
        pulled: Vec<Amount>,
        pushed: Vec<Amount>,
    },
    DepositCallbackFailed {
        vault_id: VaultId,
        callback: Address,
        reason: String,
    },
    WithdrawCallbackFailed {
        vault_id: VaultId,
        callback: Address,
        reason: String,
    },

    // --- Vault governance ------------------------------------------------
    StageDelayedStrategyParams {
        origin: Address,
        sender: Address,
        vault_id: VaultId,
        params: serde_json::Value,
        ready_at: Timestamp,
    },
    CommitDelayedStrategyParams {
        origin: Address,
        sender: Address,
        vault_id: VaultId,
        params: serde_json::Value,
    },
    StageDelayedProtocolParams {
        origin: Address,
        sender: Address,
        params: serde_json::Value,
        ready_at: Timestamp,
    },
    CommitDelayedProtocolParams {
        origin: Address,
        sender: Address,
        params: serde_json::Value,
    },
    StageDelayedProtocolPerVaultParams {
        origin: Address,
        sender: Address,
        vault_id: VaultId,
        params: serde_json::Value,
        ready_at: Timestamp,
    },
    CommitDelayedProtocolPerVaultParams {
        origin: Address,
        sender: Address,
        vault_id: VaultId,
        params: serde_json::Value,
    },
    StagedParamsCancelled {
        origin: Address,
        sender: Address,
        tier: ParamTier,
        vault_id: Option<VaultId>,
    },
    SetStrategyParams {
        origin: Address,
        sender: Address,
        vault_id: VaultId,
        params: serde_json::Value,
    },
    SetOperatorParams {
        origin: Address,
        sender: Address,
        params: serde_json::Value,
    },

    // --- Protocol governance ---------------------------------------------
    StageProtocolParams {
        origin: Address,
        sender: Address,
        params: serde_json::Value,
        ready_at: Timestamp,
    },
    CommitProtocolParams {
        origin: Address,
        sender: Address,
        params: serde_json::Value,
    },
    PermissionGrantsStaged {
        origin: Address,
        sender: Address,
        target: Address,
        permissions: PermissionSet,
        ready_at: Timestamp,
    },
    PermissionGrantsCommitted {
        origin: Address,
        sender: Address,
        target: Address,
        permissions: PermissionSet,
    },
    PermissionsRevoked {
        origin: Address,
        sender: Address,
        target: Address,
        permissions: PermissionSet,
    },
    RoleGranted {
        origin: Address,
        sender: Address,
        role: Role,
        account: Address,
    },
    RoleRevoked {
        origin: Address,
        sender: Address,
        role: Role,
        account: Address,
    },

    // --- Registry --------------------------------------------------------
    VaultRegistered {
        vault_id: VaultId,
        kind: VaultKind,
        registrar: Address,
        owner: Address,
    },
    VaultTransferred {
        vault_id: VaultId,
        from: Address,
        to: Address,
    },
    VaultLocked {
        vault_id: VaultId,
        owner: Address,
    },
}

/// A journaled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique id of this record.
    pub id: Uuid,
    /// Position in the journal, starting at 0.
    pub sequence: u64,
    /// Protocol time the event was emitted at.
    pub at: Timestamp,
    pub event: ProtocolEvent,
}

/// Append-only journal plus live fan-out.
#[derive(Debug)]
pub struct EventLog {
    records: RwLock<Vec<EventRecord>>,
    sequence: AtomicU64,
    sender: broadcast::Sender<EventRecord>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(Vec::new()),
            sequence: AtomicU64::new(0),
            sender,
        }
    }

    /// Appends an event to the journal and broadcasts it.
    pub fn emit(&self, at: Timestamp, event: ProtocolEvent) -> EventRecord {
        let record = {
            let mut records = self.records.write();
            let record = EventRecord {
                id: Uuid::new_v4(),
                sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
                at,
                event,
            };
            records.push(record.clone());
            record
        };
        // No subscribers is not an error.
        let _ = self.sender.send(record.clone());
        record
    }

    /// Live stream of records emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Snapshot of the whole journal.
    pub fn records(&self) -> Vec<EventRecord> {
        self.records.read().clone()
    }

    /// Events matching `predicate`, in emission order.
    pub fn filter<F>(&self, predicate: F) -> Vec<ProtocolEvent>
    where
        F: Fn(&ProtocolEvent) -> bool,
    {
        self.records
            .read()
            .iter()
            .filter(|r| predicate(&r.event))
            .map(|r| r.event.clone())
            .collect()
    }

    /// Number of journaled events.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serializes a parameter struct for an event payload.
///
/// `serde_json::Value` cannot hold integers above `u64::MAX`; structs that
/// carry such amounts are embedded as their JSON text instead.
pub(crate) fn payload<T: Serialize>(params: &T) -> serde_json::Value {
    serde_json::to_value(params)
        .or_else(|_| serde_json::to_string(params).map(serde_json::Value::String))
        .unwrap_or_default()
}

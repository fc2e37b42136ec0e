//! # Protocol Context
//!
//! The shared services every component needs: time, the asset ledger, the
//! event journal, metrics, the ownership registry, protocol governance and
//! the depositor callback directory. Built once and handed around as an
//! `Arc<ProtocolContext>`.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::ProtocolResult;
use crate::events::EventLog;
use crate::governance::protocol::{ProtocolGovernance, ProtocolParams};
use crate::ledger::AssetLedger;
use crate::metrics::ProtocolMetrics;
use crate::registry::VaultRegistry;
use crate::types::{Address, Timestamp};
use crate::vault::callback::CallbackRegistry;

/// Label the protocol governance address is derived from.
pub const PROTOCOL_GOVERNANCE_LABEL: &str = "keel/protocol-governance";

pub struct ProtocolContext {
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn AssetLedger>,
    events: Arc<EventLog>,
    metrics: ProtocolMetrics,
    registry: VaultRegistry,
    governance: ProtocolGovernance,
    callbacks: CallbackRegistry,
}

impl ProtocolContext {
    /// Wires up a fresh protocol instance with `admin` as its only admin.
    pub fn new(
        admin: Address,
        params: ProtocolParams,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn AssetLedger>,
    ) -> ProtocolResult<Arc<Self>> {
        let events = Arc::new(EventLog::new());
        let metrics = ProtocolMetrics::new();
        let governance = ProtocolGovernance::new(
            Address::from_label(PROTOCOL_GOVERNANCE_LABEL),
            admin,
            params,
            clock.clone(),
            events.clone(),
            metrics.clone(),
        )?;
        let registry = VaultRegistry::new(clock.clone(), events.clone(), metrics.clone());
        Ok(Arc::new(Self {
            clock,
            ledger,
            events,
            metrics,
            registry,
            governance,
            callbacks: CallbackRegistry::new(),
        }))
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ledger(&self) -> &Arc<dyn AssetLedger> {
        &self.ledger
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn metrics(&self) -> &ProtocolMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &VaultRegistry {
        &self.registry
    }

    pub fn governance(&self) -> &ProtocolGovernance {
        &self.governance
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }
}

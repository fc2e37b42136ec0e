//! Shared setup for the adapter integration tests: one protocol instance,
//! a governance per vault family (all allowed to register vaults), a
//! lending pool and two sorted assets.

#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;

use keel_adapters::lending::LendingDelayedProtocolParams;
use keel_adapters::position::PositionDelayedProtocolParams;
use keel_adapters::{
    LendingGovernance, LendingPool, LendingVault, PositionGovernance, PositionVault,
    TokenHolderGovernance, TokenHolderVault,
};
use keel_protocol::clock::ManualClock;
use keel_protocol::config::DEFAULT_GOVERNANCE_DELAY;
use keel_protocol::governance::{PermissionSet, ProtocolParams, VaultGovernance};
use keel_protocol::ledger::{AssetLedger, MemoryLedger};
use keel_protocol::telemetry::init_test_logging;
use keel_protocol::vault::family::{RootDelayedProtocolParams, RootVaultGovernance};
use keel_protocol::vault::root::RootVault;
use keel_protocol::vault::IntegrationVault;
use keel_protocol::{Address, Amount, AssetId, ProtocolContext, Timestamp, VaultId};

pub const START: Timestamp = 1_700_000_000;

pub struct Protocol {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub ctx: Arc<ProtocolContext>,
    pub admin: Address,
    pub creator: Address,
    pub strategy: Address,
    pub manager: Address,
    pub assets: Vec<AssetId>,
    pub root_governance: Arc<RootVaultGovernance>,
    pub holder_governance: TokenHolderGovernance,
    pub lending_governance: LendingGovernance,
    pub position_governance: PositionGovernance,
    pub pool: Arc<LendingPool>,
}

impl Protocol {
    pub fn new() -> Self {
        init_test_logging();
        let clock = Arc::new(ManualClock::new(START));
        let ledger = Arc::new(MemoryLedger::new());
        let admin = Address::from_label("admin");
        let ctx = ProtocolContext::new(
            admin,
            ProtocolParams::with_treasury(Address::from_label("protocol-treasury")),
            clock.clone(),
            ledger.clone(),
        )
        .expect("protocol context");

        let pool = Arc::new(
            LendingPool::new(ctx.clone(), Address::from_label("lending-pool")).expect("pool"),
        );
        let manager = Address::from_label("position-manager");

        let root_governance = Arc::new(
            RootVaultGovernance::new(
                ctx.clone(),
                Address::from_label("root-governance"),
                RootDelayedProtocolParams::default(),
            )
            .expect("root governance"),
        );
        let holder_governance: TokenHolderGovernance =
            VaultGovernance::new(ctx.clone(), Address::from_label("holder-governance"), ())
                .expect("holder governance");
        let lending_governance: LendingGovernance = VaultGovernance::new(
            ctx.clone(),
            Address::from_label("lending-governance"),
            LendingDelayedProtocolParams {
                lending_pool: pool.address(),
            },
        )
        .expect("lending governance");
        let position_governance: PositionGovernance = VaultGovernance::new(
            ctx.clone(),
            Address::from_label("position-governance"),
            PositionDelayedProtocolParams {
                position_manager: manager,
            },
        )
        .expect("position governance");

        let registrars = [
            root_governance.address(),
            holder_governance.address(),
            lending_governance.address(),
            position_governance.address(),
        ];
        for target in registrars {
            ctx.governance()
                .stage_permission_grants(admin, target, PermissionSet::REGISTER_VAULT)
                .expect("stage grant");
        }
        clock.advance(DEFAULT_GOVERNANCE_DELAY);
        for target in registrars {
            ctx.governance()
                .commit_permission_grants(admin, target)
                .expect("commit grant");
        }

        let mut assets = vec![Address::from_label("usdc"), Address::from_label("weth")];
        assets.sort();
        for asset in &assets {
            pool.list_reserve(*asset);
        }

        Self {
            clock,
            ledger,
            ctx,
            admin,
            creator: Address::from_label("creator"),
            strategy: Address::from_label("strategy"),
            manager,
            assets,
            root_governance,
            holder_governance,
            lending_governance,
            position_governance,
            pool,
        }
    }

    pub fn token_holder(&self) -> Arc<TokenHolderVault> {
        TokenHolderVault::create(&self.holder_governance, self.creator, self.assets.clone(), self.creator)
            .expect("token holder")
    }

    pub fn lending(&self) -> Arc<LendingVault> {
        LendingVault::create(
            &self.lending_governance,
            self.pool.clone(),
            self.creator,
            self.assets.clone(),
            self.creator,
        )
        .expect("lending vault")
    }

    pub fn position(&self) -> Arc<PositionVault> {
        PositionVault::create(&self.position_governance, self.creator, self.assets.clone(), self.creator)
            .expect("position vault")
    }

    pub fn root(&self, subvaults: &[VaultId]) -> Arc<RootVault> {
        RootVault::create(
            &self.root_governance,
            self.creator,
            self.assets.clone(),
            self.strategy,
            subvaults,
            self.creator,
        )
        .expect("root vault")
    }

    pub fn fund(&self, who: Address, amounts: &[Amount]) {
        for (asset, amount) in self.assets.iter().zip(amounts) {
            self.ledger.mint(*asset, who, *amount).expect("mint");
        }
    }

    pub fn balances(&self, who: Address) -> Vec<Amount> {
        self.assets
            .iter()
            .map(|asset| self.ledger.balance_of(*asset, who))
            .collect()
    }

    /// Ledger balances of a custodian in root asset order.
    pub fn held(&self, vault: &dyn IntegrationVault) -> Vec<Amount> {
        vault
            .valuate()
            .expect("valuate")
            .into_iter()
            .map(|(_, amount)| amount)
            .collect()
    }
}

pub fn options(n: usize) -> Vec<Bytes> {
    vec![Bytes::new(); n]
}

pub fn user(label: &str) -> Address {
    Address::from_label(label)
}

//! Fixtures shared by unit tests: a configurable in-memory custodian and a
//! fully wired protocol with root and custodian governances ready to
//! create vaults.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::ManualClock;
use crate::config::DEFAULT_GOVERNANCE_DELAY;
use crate::context::ProtocolContext;
use crate::error::{ProtocolError, ProtocolResult};
use crate::governance::protocol::{PermissionSet, ProtocolParams};
use crate::governance::vault::{VaultFamily, VaultGovernance};
use crate::ledger::{AssetLedger, MemoryLedger};
use crate::registry::{BoundVault, VaultRecord};
use crate::types::{Address, Amount, AssetId, Timestamp, VaultId, VaultKind};
use crate::vault::family::{RootDelayedProtocolParams, RootVaultGovernance};
use crate::vault::root::RootVault;
use crate::vault::{IntegrationCore, IntegrationVault};

pub(crate) const START: Timestamp = 1_700_000_000;

/// Custodian family with no parameters at all.
pub(crate) struct MockFamily;

impl VaultFamily for MockFamily {
    const KIND: VaultKind = VaultKind::TokenHolder;
    const NAME: &'static str = "MockVaultGovernance";
    const VERSION: &'static str = "0.1.0";

    type DelayedStrategyParams = ();
    type StrategyParams = ();
    type DelayedProtocolParams = ();
    type DelayedProtocolPerVaultParams = ();
    type OperatorParams = ();
}

#[derive(Debug)]
struct Knobs {
    /// Fraction of each pull actually delivered, in basis points.
    pull_fill_bps: u128,
    fail_push: bool,
    fail_pull: bool,
    /// Pulls report the full request whatever was delivered.
    overstate_pulls: bool,
}

/// Holds assets at its own ledger address. Pulls can be throttled or made
/// to fail.
pub(crate) struct MockCustodian {
    core: IntegrationCore,
    knobs: Mutex<Knobs>,
}

impl MockCustodian {
    pub(crate) fn new(ctx: Arc<ProtocolContext>, record: &VaultRecord) -> Self {
        Self {
            core: IntegrationCore::new(ctx, record),
            knobs: Mutex::new(Knobs {
                pull_fill_bps: 10_000,
                fail_push: false,
                fail_pull: false,
                overstate_pulls: false,
            }),
        }
    }

    pub(crate) fn set_pull_fill_bps(&self, bps: u128) {
        self.knobs.lock().pull_fill_bps = bps;
    }

    pub(crate) fn set_fail_push(&self, fail: bool) {
        self.knobs.lock().fail_push = fail;
    }

    pub(crate) fn set_fail_pull(&self, fail: bool) {
        self.knobs.lock().fail_pull = fail;
    }

    pub(crate) fn set_overstate_pulls(&self, overstate: bool) {
        self.knobs.lock().overstate_pulls = overstate;
    }

    pub(crate) fn held(&self) -> Vec<Amount> {
        self.core.ledger_holdings().into_iter().map(|(_, a)| a).collect()
    }
}

impl IntegrationVault for MockCustodian {
    fn vault_id(&self) -> VaultId {
        self.core.id()
    }

    fn kind(&self) -> VaultKind {
        self.core.kind()
    }

    fn assets(&self) -> &[AssetId] {
        self.core.assets()
    }

    fn valuate(&self) -> ProtocolResult<Vec<(AssetId, Amount)>> {
        Ok(self.core.ledger_holdings())
    }

    fn push(
        &self,
        sender: Address,
        from: Address,
        assets: &[AssetId],
        amounts: &[Amount],
        _options: &[u8],
    ) -> ProtocolResult<Vec<Amount>> {
        self.core.ensure_authorized(sender)?;
        self.core.resolve(assets, amounts)?;
        if self.knobs.lock().fail_push {
            return Err(ProtocolError::invalid_value("push refused"));
        }
        let ledger = self.core.ctx().ledger();
        for (asset, amount) in assets.iter().zip(amounts) {
            ledger.transfer(*asset, from, self.core.address(), *amount)?;
        }
        Ok(amounts.to_vec())
    }

    fn pull(
        &self,
        sender: Address,
        to: Address,
        assets: &[AssetId],
        amounts: &[Amount],
        _options: &[u8],
    ) -> ProtocolResult<Vec<Amount>> {
        self.core.ensure_authorized(sender)?;
        self.core.resolve(assets, amounts)?;
        let (fill, overstate) = {
            let knobs = self.knobs.lock();
            if knobs.fail_pull {
                return Err(ProtocolError::invalid_value("pull refused"));
            }
            (knobs.pull_fill_bps, knobs.overstate_pulls)
        };
        let ledger = self.core.ctx().ledger();
        let mut actual = Vec::with_capacity(amounts.len());
        for (asset, amount) in assets.iter().zip(amounts) {
            let held = ledger.balance_of(*asset, self.core.address());
            let sent = (*amount * fill / 10_000).min(held);
            ledger.transfer(*asset, self.core.address(), to, sent)?;
            actual.push(sent);
        }
        self.core.note_fill("pull", amounts, &actual);
        if overstate {
            return Ok(amounts.to_vec());
        }
        Ok(actual)
    }
}

/// A protocol instance with everything a root vault test needs.
pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<MemoryLedger>,
    pub ctx: Arc<ProtocolContext>,
    pub admin: Address,
    pub creator: Address,
    pub strategy: Address,
    pub assets: Vec<AssetId>,
    pub root_governance: Arc<RootVaultGovernance>,
    pub custodian_governance: Arc<VaultGovernance<MockFamily>>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let ledger = Arc::new(MemoryLedger::new());
        let admin = Address::from_label("admin");
        let ctx = ProtocolContext::new(
            admin,
            ProtocolParams::with_treasury(Address::from_label("protocol-treasury")),
            clock.clone(),
            ledger.clone(),
        )
        .unwrap();

        let root_governance = Arc::new(
            RootVaultGovernance::new(
                ctx.clone(),
                Address::from_label("root-governance"),
                RootDelayedProtocolParams::default(),
            )
            .unwrap(),
        );
        let custodian_governance = Arc::new(
            VaultGovernance::<MockFamily>::new(ctx.clone(), Address::from_label("mock-governance"), ())
                .unwrap(),
        );
        let governance = ctx.governance();
        for target in [root_governance.address(), custodian_governance.address()] {
            governance
                .stage_permission_grants(admin, target, PermissionSet::REGISTER_VAULT)
                .unwrap();
        }
        clock.advance(DEFAULT_GOVERNANCE_DELAY);
        for target in [root_governance.address(), custodian_governance.address()] {
            governance.commit_permission_grants(admin, target).unwrap();
        }

        let mut assets = vec![Address::from_label("usdc"), Address::from_label("weth")];
        assets.sort();

        Self {
            clock,
            ledger,
            ctx,
            admin,
            creator: Address::from_label("creator"),
            strategy: Address::from_label("strategy"),
            assets,
            root_governance,
            custodian_governance,
        }
    }

    pub(crate) fn custodian(&self) -> Arc<MockCustodian> {
        let ctx = self.ctx.clone();
        self.custodian_governance
            .create_vault(self.creator, self.assets.clone(), self.creator, |record| {
                let vault = Arc::new(MockCustodian::new(ctx, record));
                Ok((vault.clone(), BoundVault::Integration(vault)))
            })
            .unwrap()
    }

    /// A root vault over `n` fresh custodians, owned by the creator.
    pub(crate) fn root_vault(&self, n: usize) -> (Arc<RootVault>, Vec<Arc<MockCustodian>>) {
        let custodians: Vec<_> = (0..n).map(|_| self.custodian()).collect();
        let ids: Vec<_> = custodians.iter().map(|c| c.vault_id()).collect();
        let root = RootVault::create(
            &self.root_governance,
            self.creator,
            self.assets.clone(),
            self.strategy,
            &ids,
            self.creator,
        )
        .unwrap();
        (root, custodians)
    }

    pub(crate) fn fund(&self, who: Address, amounts: &[Amount]) {
        for (asset, amount) in self.assets.iter().zip(amounts) {
            self.ledger.mint(*asset, who, *amount).unwrap();
        }
    }

    pub(crate) fn balances(&self, who: Address) -> Vec<Amount> {
        self.assets
            .iter()
            .map(|asset| self.ledger.balance_of(*asset, who))
            .collect()
    }
}

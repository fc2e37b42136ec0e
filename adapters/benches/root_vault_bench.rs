// Root vault benchmarks for KEEL.
//
// Covers deposit quoting, and full deposit/withdraw cycles over a growing
// number of token holder and lending sub-vaults.

use std::sync::Arc;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use keel_adapters::lending::LendingDelayedProtocolParams;
use keel_adapters::{LendingGovernance, LendingPool, LendingVault, TokenHolderGovernance, TokenHolderVault};
use keel_protocol::clock::ManualClock;
use keel_protocol::config::DEFAULT_GOVERNANCE_DELAY;
use keel_protocol::governance::{PermissionSet, ProtocolParams, VaultGovernance};
use keel_protocol::ledger::{AssetLedger, MemoryLedger};
use keel_protocol::telemetry::{init_logging, LogSettings};
use keel_protocol::vault::family::{RootDelayedProtocolParams, RootVaultGovernance};
use keel_protocol::vault::root::{quote_deposit, RootVault};
use keel_protocol::vault::IntegrationVault;
use keel_protocol::{Address, AssetId, ProtocolContext, VaultId};

struct Setup {
    ledger: Arc<MemoryLedger>,
    assets: Vec<AssetId>,
    root: Arc<RootVault>,
    subvaults: usize,
}

/// Builds a root vault over `n` sub-vaults, alternating token holders and
/// lending vaults, with a bootstrap deposit already in place.
fn setup_root(n: usize) -> Setup {
    let clock = Arc::new(ManualClock::new(1_700_000_000));
    let ledger = Arc::new(MemoryLedger::new());
    let admin = Address::from_label("admin");
    let creator = Address::from_label("creator");
    let ctx = ProtocolContext::new(
        admin,
        ProtocolParams::with_treasury(Address::from_label("treasury")),
        clock.clone(),
        ledger.clone(),
    )
    .unwrap();

    let pool = Arc::new(LendingPool::new(ctx.clone(), Address::from_label("pool")).unwrap());
    let root_governance = Arc::new(
        RootVaultGovernance::new(
            ctx.clone(),
            Address::from_label("root-governance"),
            RootDelayedProtocolParams::default(),
        )
        .unwrap(),
    );
    let holders: TokenHolderGovernance =
        VaultGovernance::new(ctx.clone(), Address::from_label("holder-governance"), ()).unwrap();
    let lenders: LendingGovernance = VaultGovernance::new(
        ctx.clone(),
        Address::from_label("lending-governance"),
        LendingDelayedProtocolParams {
            lending_pool: pool.address(),
        },
    )
    .unwrap();

    let registrars = [root_governance.address(), holders.address(), lenders.address()];
    for target in registrars {
        ctx.governance()
            .stage_permission_grants(admin, target, PermissionSet::REGISTER_VAULT)
            .unwrap();
    }
    clock.advance(DEFAULT_GOVERNANCE_DELAY);
    for target in registrars {
        ctx.governance().commit_permission_grants(admin, target).unwrap();
    }

    let mut assets = vec![Address::from_label("usdc"), Address::from_label("weth")];
    assets.sort();
    for asset in &assets {
        pool.list_reserve(*asset);
    }

    let ids: Vec<VaultId> = (0..n)
        .map(|i| {
            if i % 2 == 0 {
                TokenHolderVault::create(&holders, creator, assets.clone(), creator)
                    .unwrap()
                    .vault_id()
            } else {
                LendingVault::create(&lenders, pool.clone(), creator, assets.clone(), creator)
                    .unwrap()
                    .vault_id()
            }
        })
        .collect();
    let root = RootVault::create(
        &root_governance,
        creator,
        assets.clone(),
        Address::from_label("strategy"),
        &ids,
        creator,
    )
    .unwrap();

    let seed = Address::from_label("seed");
    for asset in &assets {
        ledger.mint(*asset, seed, 1_000_000_000).unwrap();
    }
    root.deposit(seed, &[1_000_000_000, 1_000_000_000], 0, &[]).unwrap();

    Setup {
        ledger,
        assets,
        root,
        subvaults: n,
    }
}

/// Quiet unless `KEEL_LOG` asks for more; the hot paths log at info.
fn install_logging() {
    let settings = LogSettings::new("warn")
        .with_env_overrides()
        .expect("log settings");
    init_logging(&settings).expect("log subscriber");
}

fn bench_quote_deposit(c: &mut Criterion) {
    install_logging();
    let tvl = vec![1_234_567_890u128, 987_654_321, 555_555_555, 42_000_000];
    let amounts = vec![1_000u128, 2_000, 3_000, 4_000];

    c.bench_function("root/quote_deposit", |b| {
        b.iter(|| quote_deposit(&amounts, &tvl, 1_000_000_000).unwrap());
    });
}

fn bench_deposit_withdraw_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("root/deposit_withdraw");

    for n in [1, 2, 4, 8] {
        let setup = setup_root(n);
        let user = Address::from_label("bench-user");
        let options = vec![Bytes::new(); setup.subvaults];

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(n), &setup, |b, setup| {
            b.iter(|| {
                for asset in &setup.assets {
                    setup.ledger.mint(*asset, user, 100_000).unwrap();
                }
                let shares = setup
                    .root
                    .deposit(user, &[100_000, 100_000], 0, &options)
                    .unwrap();
                setup.root.withdraw(user, user, shares, &[0, 0], &options).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_quote_deposit, bench_deposit_withdraw_cycle);
criterion_main!(benches);

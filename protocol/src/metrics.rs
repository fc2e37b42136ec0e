//! # Prometheus Metrics
//!
//! Operational counters for a running protocol instance. All metrics are
//! registered in a dedicated [`prometheus::Registry`] under the `keel`
//! namespace so they never collide with a host's default registry. Hosts
//! that serve `/metrics` call [`ProtocolMetrics::encode`].

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

/// Handles for every KEEL metric.
///
/// Prometheus handles are internally reference counted, so cloning is cheap
/// and all clones update the same series.
#[derive(Clone)]
pub struct ProtocolMetrics {
    registry: Registry,
    /// Successful root vault deposits.
    pub deposits_total: IntCounter,
    /// Successful root vault withdrawals.
    pub withdrawals_total: IntCounter,
    /// Fee charges that minted shares (management, protocol or performance).
    pub fee_charges_total: IntCounter,
    /// Committed parameter changes across all governance components.
    pub governance_commits_total: IntCounter,
    /// Vaults registered in the ownership registry.
    pub vaults_registered_total: IntCounter,
    /// Depositor callbacks that failed or panicked.
    pub callback_failures_total: IntCounter,
    /// Custodian pulls or pushes that moved less than requested.
    pub partial_fills_total: IntCounter,
    /// Wall time of root vault deposit and withdraw calls.
    pub root_operation_seconds: Histogram,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric creation");
    registry
        .register(Box::new(counter.clone()))
        .expect("metric registration");
    counter
}

impl ProtocolMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("keel".into()), None)
            .expect("failed to create prometheus registry");

        let deposits_total = counter(&registry, "deposits_total", "Successful root vault deposits");
        let withdrawals_total = counter(
            &registry,
            "withdrawals_total",
            "Successful root vault withdrawals",
        );
        let fee_charges_total = counter(
            &registry,
            "fee_charges_total",
            "Fee charges that minted shares to a treasury",
        );
        let governance_commits_total = counter(
            &registry,
            "governance_commits_total",
            "Committed timelocked parameter changes",
        );
        let vaults_registered_total = counter(
            &registry,
            "vaults_registered_total",
            "Vaults registered in the ownership registry",
        );
        let callback_failures_total = counter(
            &registry,
            "callback_failures_total",
            "Depositor callbacks that failed and were swallowed",
        );
        let partial_fills_total = counter(
            &registry,
            "partial_fills_total",
            "Custodian pulls or pushes that moved less than requested",
        );

        let root_operation_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "root_operation_seconds",
                "Wall time of root vault deposit and withdraw calls in seconds",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(root_operation_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            deposits_total,
            withdrawals_total,
            fee_charges_total,
            governance_commits_total,
            vaults_registered_total,
            callback_failures_total,
            partial_fills_total,
            root_operation_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for ProtocolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

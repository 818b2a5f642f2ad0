use crate::lookup::Reader;
use l4_dataplane_api::Kind;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{counter::Counter, family::Family, gauge::ConstGauge, gauge::Gauge, MetricType},
    registry::Registry,
};

/// Counts resource updates processed by the index.
#[derive(Clone, Debug, Default)]
pub struct IndexMetrics {
    index_applies: Family<KindLabels, Counter>,
    index_deletes: Family<KindLabels, Counter>,
    index_rejects: Family<KindLabels, Counter>,
    policies: Gauge,
}

/// Counts connection decisions made by the engine.
#[derive(Clone, Debug, Default)]
pub struct DecisionMetrics {
    authz: Family<AuthzLabels, Counter>,
    connect: Family<ConnectLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct AuthzLabels {
    action: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ConnectLabels {
    outcome: &'static str,
}

#[derive(Debug)]
struct Instrumented(Reader);

/// Registers gauges describing the most recently published tables.
pub fn register(reg: &mut Registry, reader: Reader) {
    reg.register_collector(Box::new(Instrumented(reader)));
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "index_applies",
            "Count of applies to the index",
            metrics.index_applies.clone(),
        );
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            metrics.index_deletes.clone(),
        );
        prom.register(
            "index_rejects",
            "Count of resources rejected because they failed to compile",
            metrics.index_rejects.clone(),
        );
        prom.register(
            "policies",
            "The number of compiled authorization policies",
            metrics.policies.clone(),
        );
        metrics
    }

    pub(crate) fn applied(&self, kind: Kind) {
        self.index_applies
            .get_or_create(&KindLabels {
                kind: kind.as_str(),
            })
            .inc();
    }

    pub(crate) fn deleted(&self, kind: Kind) {
        self.index_deletes
            .get_or_create(&KindLabels {
                kind: kind.as_str(),
            })
            .inc();
    }

    pub(crate) fn rejected(&self, kind: Kind) {
        self.index_rejects
            .get_or_create(&KindLabels {
                kind: kind.as_str(),
            })
            .inc();
    }

    pub(crate) fn set_policies(&self, n: usize) {
        self.policies.set(n as i64);
    }
}

// === impl DecisionMetrics ===

impl DecisionMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "authz_decisions",
            "Count of authorization decisions by action",
            metrics.authz.clone(),
        );
        prom.register(
            "connect_decisions",
            "Count of connection decisions by outcome",
            metrics.connect.clone(),
        );
        metrics
    }

    pub(crate) fn authz(&self, action: &'static str) {
        self.authz.get_or_create(&AuthzLabels { action }).inc();
    }

    pub(crate) fn connect(&self, outcome: &'static str) {
        self.connect.get_or_create(&ConnectLabels { outcome }).inc();
    }
}

// === impl Instrumented ===

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let policies = self.0.policies();
        let registry = self.0.registry();

        let policy_encoder = encoder.encode_descriptor(
            "policy_table_size",
            "The number of services with at least one authorization policy",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(policies.len() as i64).encode(policy_encoder)?;

        let service_encoder = encoder.encode_descriptor(
            "service_index_size",
            "The number of services in the endpoint registry",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(registry.len() as i64).encode(service_encoder)?;

        let endpoint_encoder = encoder.encode_descriptor(
            "endpoint_index_size",
            "The number of endpoints in the endpoint registry",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(registry.endpoints_len() as i64).encode(endpoint_encoder)?;

        Ok(())
    }
}

use crate::core::{AliasOp, SinkOp};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct SinkMetrics {
    requests: Family<OpLabels, Counter>,
    failures: Family<OpLabels, Counter>,
}

#[derive(Clone, Debug, Default)]
pub struct AliasMetrics {
    ops: Family<OpLabels, Counter>,
    failures: Family<OpLabels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OpLabels {
    op: &'static str,
}

// === impl SinkMetrics ===

impl SinkMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let requests = Family::<OpLabels, Counter>::default();
        reg.register(
            "requests",
            "Total number of requests sent to the load balancer",
            requests.clone(),
        );

        let failures = Family::<OpLabels, Counter>::default();
        reg.register(
            "failures",
            "Total number of load balancer operations that failed after all attempts",
            failures.clone(),
        );

        Self { requests, failures }
    }

    pub(crate) fn request(&self, op: SinkOp) {
        self.requests.get_or_create(&OpLabels { op: op.as_str() }).inc();
    }

    pub(crate) fn failure(&self, op: SinkOp) {
        self.failures.get_or_create(&OpLabels { op: op.as_str() }).inc();
    }
}

// === impl AliasMetrics ===

impl AliasMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let ops = Family::<OpLabels, Counter>::default();
        reg.register(
            "alias_ops",
            "Total number of loopback alias operations run in backend pods",
            ops.clone(),
        );

        let failures = Family::<OpLabels, Counter>::default();
        reg.register(
            "alias_failures",
            "Total number of loopback alias operations that failed",
            failures.clone(),
        );

        Self { ops, failures }
    }

    pub(crate) fn op(&self, op: AliasOp) {
        self.ops.get_or_create(&OpLabels { op: op.as_str() }).inc();
    }

    pub(crate) fn failure(&self, op: AliasOp) {
        self.failures.get_or_create(&OpLabels { op: op.as_str() }).inc();
    }
}

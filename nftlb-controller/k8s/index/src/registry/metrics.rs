use super::{DsrState, SharedRegistry};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedRegistry);

pub fn register(reg: &mut Registry, registry: SharedRegistry) {
    reg.register_collector(Box::new(Instrumented(registry)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let this = self.0.read();

        let farms_encoder = encoder.encode_descriptor(
            "farms",
            "The number of farms declared by services",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.owners.len() as u32).encode(farms_encoder)?;

        let node_port_encoder = encoder.encode_descriptor(
            "node_port_farms",
            "The number of node-port twin farms",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.node_ports.len() as u32).encode(node_port_encoder)?;

        let external_encoder = encoder.encode_descriptor(
            "external_ip_farms",
            "The number of external address twin farms",
            None,
            MetricType::Gauge,
        )?;
        let external = this.external.values().map(Vec::len).sum::<usize>();
        ConstGauge::new(external as u32).encode(external_encoder)?;

        let ceilings_encoder = encoder.encode_descriptor(
            "connection_ceilings",
            "The number of farms with a backend connection ceiling",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.ceilings.len() as u32).encode(ceilings_encoder)?;

        let mut dsr_encoder = encoder.encode_descriptor(
            "dsr_records",
            "The number of direct-server-return records by state",
            None,
            MetricType::Gauge,
        )?;
        for state in [
            DsrState::PendingTargets,
            DsrState::Active,
            DsrState::Retracting,
        ] {
            let records = this.dsr.values().filter(|r| r.state == state).count();
            let labels = vec![("state", state.as_str())];
            let record_encoder = dsr_encoder.encode_family(&labels)?;
            ConstGauge::new(records as u32).encode(record_encoder)?;
        }

        let endpoints_encoder = encoder.encode_descriptor(
            "endpoints",
            "The number of tracked endpoints objects",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(this.endpoints.len() as u32).encode(endpoints_encoder)?;

        let backends_encoder = encoder.encode_descriptor(
            "backends",
            "The number of backends across all endpoints objects",
            None,
            MetricType::Gauge,
        )?;
        let backends = this.backend_counts.values().sum::<usize>();
        ConstGauge::new(backends as u32).encode(backends_encoder)?;

        Ok(())
    }
}

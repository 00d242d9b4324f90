use crate::{
    annotations::{self, FarmParams},
    Settings,
};
use nftlb_controller_core::{Family, Farm, FarmName, FarmRole, Mode, State};
use nftlb_controller_k8s_api::{ResourceExt, Service, ServicePort};
use std::net::IpAddr;

/// The farms declared for a service, in port order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceFarms {
    pub params: FarmParams,

    /// Whether the service is reachable on every node's port.
    pub node_accessible: bool,

    /// The value of the pod discovery label on the service, if set.
    pub pod_selector: Option<(String, String)>,

    pub farms: Vec<ServiceFarm>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceFarm {
    pub role: FarmRole,

    /// The cluster farm this farm derives from. Equals the farm's own name
    /// for cluster farms.
    pub base: FarmName,

    pub farm: Farm,
}

/// Builds every farm a service declares: one cluster farm per port, a
/// node-port twin per port when the service is node-accessible, and one twin
/// per external address.
pub fn synthesize_farms(service: &Service, settings: &Settings) -> ServiceFarms {
    let params = annotations::interpret(service);
    let name = service.name_any();
    let spec = service.spec.clone().unwrap_or_default();

    let node_accessible = matches!(
        spec.type_.as_deref(),
        Some("NodePort") | Some("LoadBalancer")
    );
    let cluster_addr = spec
        .cluster_ip
        .as_deref()
        .and_then(|ip| ip.parse::<IpAddr>().ok());
    let external_addrs = spec
        .external_ips
        .iter()
        .flatten()
        .filter_map(|ip| match ip.parse::<IpAddr>() {
            Ok(addr) => Some(addr),
            Err(error) => {
                tracing::debug!(service = %name, %ip, %error, "Ignoring invalid external IP");
                None
            }
        })
        .collect::<Vec<_>>();

    let mut farms = Vec::new();
    for port in spec.ports.iter().flatten() {
        let Ok(virtual_port) = u16::try_from(port.port) else {
            tracing::debug!(service = %name, port = port.port, "Ignoring invalid port");
            continue;
        };
        let base = FarmName::for_port(&name, port.name.as_deref());

        farms.push(ServiceFarm {
            role: FarmRole::Cluster,
            base: base.clone(),
            farm: mk_farm(
                base.clone(),
                params.family,
                cluster_addr,
                virtual_port,
                port,
                &params,
                settings,
            ),
        });

        if node_accessible {
            match port.node_port.and_then(|p| u16::try_from(p).ok()) {
                Some(node_port) if node_port > 0 => farms.push(ServiceFarm {
                    role: FarmRole::NodePort,
                    base: base.clone(),
                    farm: mk_farm(
                        base.node_port(),
                        params.family,
                        None,
                        node_port,
                        port,
                        &params,
                        settings,
                    ),
                }),
                _ => tracing::debug!(service = %name, farm = %base, "No node port allocated yet"),
            }
        }

        for addr in &external_addrs {
            farms.push(ServiceFarm {
                role: FarmRole::ExternalIp,
                base: base.clone(),
                farm: mk_farm(
                    base.external_ip(&addr.to_string()),
                    Family::of(addr),
                    Some(*addr),
                    virtual_port,
                    port,
                    &params,
                    settings,
                ),
            });
        }
    }

    let pod_selector = service
        .labels()
        .get(&settings.dsr_pod_label)
        .map(|value| (settings.dsr_pod_label.clone(), value.clone()));

    ServiceFarms {
        params,
        node_accessible,
        pod_selector,
        farms,
    }
}

fn mk_farm(
    name: FarmName,
    family: Family,
    virtual_addr: Option<IpAddr>,
    virtual_port: u16,
    port: &ServicePort,
    params: &FarmParams,
    settings: &Settings,
) -> Farm {
    let protocol = port
        .protocol
        .as_deref()
        .unwrap_or("TCP")
        .to_ascii_lowercase();
    let iface = (params.mode == Mode::Dsr).then(|| settings.dsr_iface.clone());

    Farm {
        name,
        family: Some(family),
        virtual_addr,
        virtual_ports: Some(virtual_port),
        mode: Some(params.mode),
        protocol: Some(protocol),
        scheduler: Some(params.scheduler),
        sched_param: Some(params.sched_param),
        helper: params.helper.clone(),
        log: params.log.clone(),
        log_prefix: params.log_prefix.clone(),
        state: Some(State::Up),
        intra_connect: Some(true),
        persistence: params.persistence,
        persist_ttl: params.persist_ttl,
        iface,
        backends: Vec::new(),
    }
}

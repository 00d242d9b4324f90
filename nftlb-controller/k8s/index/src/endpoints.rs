use crate::Registry;
use nftlb_controller_core::{Backend, FarmName, FarmSet, ResourceId, State};
use nftlb_controller_k8s_api::{Endpoints, ResourceExt};
use std::net::IpAddr;

/// A backend observed in an endpoints object, attached to its cluster farm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub farm: FarmName,
    pub backend: Backend,

    /// The pod serving this backend, when the address references one.
    pub pod: Option<ResourceId>,
}

/// Lists every subset/address/port combination of an endpoints object.
///
/// Backends are named after the pod they reference, or after the endpoints
/// object itself when the address has no target.
pub fn targets(endpoints: &Endpoints) -> Vec<Target> {
    let name = endpoints.name_any();
    let namespace = endpoints.namespace().unwrap_or_default();

    let mut targets = Vec::new();
    for subset in endpoints.subsets.iter().flatten() {
        for address in subset.addresses.iter().flatten() {
            let ip_addr = match address.ip.parse::<IpAddr>() {
                Ok(ip) => ip,
                Err(error) => {
                    tracing::debug!(endpoints = %name, ip = %address.ip, %error, "Ignoring invalid address");
                    continue;
                }
            };
            let target_ref = address
                .target_ref
                .as_ref()
                .filter(|r| r.name.as_deref().is_some_and(|n| !n.is_empty()));
            let backend_name = target_ref
                .and_then(|r| r.name.clone())
                .unwrap_or_else(|| name.clone());
            let pod = target_ref
                .filter(|r| r.kind.as_deref().unwrap_or("Pod") == "Pod")
                .map(|r| {
                    ResourceId::new(
                        r.namespace.clone().unwrap_or_else(|| namespace.clone()),
                        backend_name.clone(),
                    )
                });

            for port in subset.ports.iter().flatten() {
                let Ok(backend_port) = u16::try_from(port.port) else {
                    tracing::debug!(endpoints = %name, port = port.port, "Ignoring invalid port");
                    continue;
                };
                targets.push(Target {
                    farm: FarmName::for_port(&name, port.name.as_deref()),
                    backend: Backend {
                        name: backend_name.clone(),
                        ip_addr,
                        state: Some(State::Up),
                        port: Some(backend_port),
                        est_connlimit: None,
                    },
                    pod: pod.clone(),
                });
            }
        }
    }
    targets
}

/// Builds the backend declaration for an endpoints object's targets.
///
/// Each backend receives its farm's connection ceiling and is replicated under
/// every twin the registry knows for the farm.
pub fn synthesize_backends(targets: &[Target], registry: &Registry) -> FarmSet {
    let mut farms = FarmSet::default();
    for Target { farm, backend, .. } in targets {
        let backend = Backend {
            est_connlimit: registry.ceiling(farm),
            ..backend.clone()
        };
        for name in registry.published_farms(farm) {
            farms.backends_mut(&name).push(backend.clone());
        }
    }
    farms
}

use crate::{
    delta::{self, Removal},
    endpoints::{self, Target},
    service::ServiceFarms,
};
use ahash::AHashMap as HashMap;
use nftlb_controller_core::{Error, FarmName, FarmRole, FarmSet, Mode, ResourceId};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

mod dsr;
pub mod metrics;

pub use self::dsr::{AliasChange, Bootstrap, DsrPlan, DsrRecord, DsrState};

pub type SharedRegistry = Arc<RwLock<Registry>>;

/// Correlation state derived from cluster objects that the load balancer's
/// model has no place for.
///
/// The registry is a cache: it is rebuilt from a re-delivery of the cluster's
/// current state. Each notification mutates it in a single write section that
/// returns the I/O the notification requires.
#[derive(Debug, Default)]
pub struct Registry {
    /// The service object that declared each farm.
    owners: HashMap<FarmName, ResourceId>,

    /// The farms each service object declared, in declaration order.
    services: HashMap<ResourceId, Vec<FarmName>>,

    /// Node-port twins by cluster farm.
    node_ports: HashMap<FarmName, FarmName>,

    /// External-address twins by cluster farm.
    external: HashMap<FarmName, Vec<FarmName>>,

    /// Per-farm backend connection ceilings.
    ceilings: HashMap<FarmName, u32>,

    dsr: HashMap<FarmName, DsrRecord>,

    endpoints: HashMap<ResourceId, EndpointsState>,

    /// Backends per endpoints object; zero once the object is drained.
    backend_counts: HashMap<ResourceId, usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct EndpointsState {
    /// Cluster farms fed by the object, in first-seen order.
    farms: Vec<FarmName>,
    backends: BTreeSet<String>,
    pods: BTreeMap<FarmName, BTreeSet<ResourceId>>,
}

/// The I/O required by a service notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceUpdate {
    pub farms: FarmSet,

    /// Farms the service declared before but no longer does.
    pub stale: Vec<FarmName>,

    pub dsr: DsrPlan,
}

/// The I/O required by a service deletion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRemoval {
    pub farms: Vec<FarmName>,
    pub dsr: DsrPlan,
}

/// The I/O required by an endpoints notification. Removals are issued only
/// after the declaration has been pushed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointsUpdate {
    pub farms: FarmSet,
    pub removals: Vec<Removal>,
    pub dsr: DsrPlan,
}

// === impl Registry ===

impl Registry {
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Records the farms a service declares.
    ///
    /// Fails without changing any state if another object already declared
    /// one of the farms.
    pub fn apply_service(
        &mut self,
        id: &ResourceId,
        service: ServiceFarms,
    ) -> Result<ServiceUpdate, Error> {
        for sf in &service.farms {
            if let Some(owner) = self.owner(&sf.farm.name) {
                if owner != id {
                    return Err(Error::NamingCollision {
                        farm: sf.farm.name.clone(),
                        owner: owner.clone(),
                        claimant: id.clone(),
                    });
                }
            }
        }

        let names = service
            .farms
            .iter()
            .map(|sf| sf.farm.name.clone())
            .collect::<Vec<_>>();
        let previous = self
            .services
            .insert(id.clone(), names.clone())
            .unwrap_or_default();

        let mut plan = DsrPlan::default();
        let stale = previous
            .into_iter()
            .filter(|name| !names.contains(name))
            .collect::<Vec<_>>();
        for farm in &stale {
            tracing::debug!(service = %id, %farm, "Farm no longer declared");
            self.forget_farm(farm, &mut plan);
        }
        for name in &names {
            self.owners.insert(name.clone(), id.clone());
        }

        let is_dsr = service.params.mode == Mode::Dsr;
        for sf in service.farms.iter().filter(|sf| sf.role == FarmRole::Cluster) {
            let base = &sf.base;

            match service
                .farms
                .iter()
                .find(|t| t.role == FarmRole::NodePort && t.base == *base)
            {
                Some(twin) => {
                    self.node_ports.insert(base.clone(), twin.farm.name.clone());
                }
                None => {
                    self.node_ports.remove(base);
                }
            }

            let external = service
                .farms
                .iter()
                .filter(|t| t.role == FarmRole::ExternalIp && t.base == *base)
                .map(|t| t.farm.name.clone())
                .collect::<Vec<_>>();
            if external.is_empty() {
                self.external.remove(base);
            } else {
                self.external.insert(base.clone(), external);
            }

            match service.params.connection_ceiling {
                Some(ceiling) => {
                    self.ceilings.insert(base.clone(), ceiling);
                }
                None => {
                    self.ceilings.remove(base);
                }
            }

            match sf.farm.virtual_addr.filter(|_| is_dsr) {
                Some(addr) => {
                    let known = self.endpoint_pods(id, base);
                    let selector = service.pod_selector.as_ref().map(|(label, value)| Bootstrap {
                        farm: base.clone(),
                        addr,
                        namespace: id.namespace.clone(),
                        label: label.clone(),
                        value: value.clone(),
                    });
                    self.enter_dsr(base, addr, known, selector, &mut plan);
                }
                None if self.dsr.contains_key(base) => {
                    if service.node_accessible {
                        // Aliases are kept when a node-accessible farm leaves DSR mode.
                        tracing::debug!(farm = %base, "Retaining DSR aliases for node-accessible farm");
                    } else {
                        self.leave_dsr(base, &mut plan);
                    }
                }
                None => {}
            }
        }

        Ok(ServiceUpdate {
            farms: service.farms.into_iter().map(|sf| sf.farm).collect(),
            stale,
            dsr: plan,
        })
    }

    /// Forgets every farm a service declared.
    pub fn delete_service(&mut self, id: &ResourceId) -> ServiceRemoval {
        let Some(farms) = self.services.remove(id) else {
            tracing::debug!(service = %id, "Deleting unknown service");
            return ServiceRemoval::default();
        };

        let mut plan = DsrPlan::default();
        for farm in &farms {
            self.forget_farm(farm, &mut plan);
        }
        ServiceRemoval { farms, dsr: plan }
    }

    /// Records the backends of an endpoints object.
    ///
    /// Targets of farms declared by another object are dropped: a service
    /// rejected for a naming collision must not feed the owner's farm.
    pub fn apply_endpoints(&mut self, id: &ResourceId, targets: Vec<Target>) -> EndpointsUpdate {
        let targets = targets
            .into_iter()
            .filter(|target| match self.owner(&target.farm) {
                Some(owner) if owner != id => {
                    tracing::warn!(
                        endpoints = %id,
                        farm = %target.farm,
                        %owner,
                        backend = %target.backend.name,
                        "Ignoring backend of a farm declared by another service"
                    );
                    false
                }
                _ => true,
            })
            .collect::<Vec<_>>();
        let farms = endpoints::synthesize_backends(&targets, self);

        let mut state = EndpointsState::default();
        for Target { farm, backend, pod } in targets {
            if !state.farms.contains(&farm) {
                state.farms.push(farm.clone());
            }
            match pod {
                Some(pod) => {
                    state.pods.entry(farm).or_default().insert(pod);
                }
                None if self.dsr.contains_key(&farm) => {
                    tracing::debug!(%farm, backend = %backend.name, "Backend has no pod to alias");
                }
                None => {}
            }
            state.backends.insert(backend.name);
        }

        self.update_endpoints(id, state, farms)
    }

    /// Forgets the backends of an endpoints object.
    pub fn delete_endpoints(&mut self, id: &ResourceId) -> EndpointsUpdate {
        if !self.endpoints.contains_key(id) {
            tracing::debug!(endpoints = %id, "Deleting unknown endpoints");
        }
        self.update_endpoints(id, EndpointsState::default(), FarmSet::default())
    }

    /// The farms that publish a cluster farm's backends: the farm itself and
    /// each of its twins.
    pub fn published_farms(&self, base: &FarmName) -> Vec<FarmName> {
        let mut farms = vec![base.clone()];
        farms.extend(self.node_port_twin(base).cloned());
        farms.extend(self.external.get(base).into_iter().flatten().cloned());
        farms
    }

    pub fn node_port_twin(&self, base: &FarmName) -> Option<&FarmName> {
        self.node_ports.get(base)
    }

    pub fn ceiling(&self, farm: &FarmName) -> Option<u32> {
        self.ceilings.get(farm).copied()
    }

    pub fn owner(&self, farm: &FarmName) -> Option<&ResourceId> {
        self.owners.get(farm)
    }

    pub fn dsr_record(&self, farm: &FarmName) -> Option<&DsrRecord> {
        self.dsr.get(farm)
    }

    #[cfg(test)]
    pub(crate) fn backend_count(&self, id: &ResourceId) -> usize {
        self.backend_counts.get(id).copied().unwrap_or(0)
    }

    fn update_endpoints(
        &mut self,
        id: &ResourceId,
        state: EndpointsState,
        farms: FarmSet,
    ) -> EndpointsUpdate {
        let previous = self.endpoints.remove(id).unwrap_or_default();
        let removals = delta::removals(
            &previous.backends,
            &state.backends,
            &self.expand(&previous.farms),
            &self.expand(&state.farms),
        );

        let mut plan = DsrPlan::default();
        let mut fed = previous.farms.clone();
        fed.extend(state.farms.iter().filter(|f| !previous.farms.contains(f)).cloned());
        for farm in &fed {
            let desired = state.pods.get(farm).cloned().unwrap_or_default();
            self.sync_dsr_targets(farm, &desired, &mut plan);
        }

        if state.backends.is_empty() {
            if let Some(drained) = self.backend_counts.remove(id) {
                tracing::debug!(endpoints = %id, backends = drained, "Endpoints drained");
            }
        } else {
            self.backend_counts.insert(id.clone(), state.backends.len());
        }
        if !state.farms.is_empty() {
            self.endpoints.insert(id.clone(), state);
        }

        EndpointsUpdate {
            farms,
            removals,
            dsr: plan,
        }
    }

    fn expand(&self, bases: &[FarmName]) -> Vec<FarmName> {
        bases.iter().flat_map(|b| self.published_farms(b)).collect()
    }

    fn endpoint_pods(&self, id: &ResourceId, farm: &FarmName) -> Option<BTreeSet<ResourceId>> {
        self.endpoints
            .get(id)?
            .pods
            .get(farm)
            .filter(|pods| !pods.is_empty())
            .cloned()
    }

    fn forget_farm(&mut self, farm: &FarmName, plan: &mut DsrPlan) {
        self.owners.remove(farm);
        self.node_ports.remove(farm);
        self.node_ports.retain(|_, twin| twin != farm);
        self.external.remove(farm);
        self.external.retain(|_, twins| {
            twins.retain(|twin| twin != farm);
            !twins.is_empty()
        });
        self.ceilings.remove(farm);
        if self.dsr.contains_key(farm) {
            self.leave_dsr(farm, plan);
        }
    }
}

use crate::{
    core::{BackendExec, ConfigSink, Error, FarmName, FarmSet, PodLookup, ResourceId, SinkError},
    dispatch::{Event, Notification},
    index::{Registry, Settings, SharedRegistry},
    k8s::{
        EndpointAddress, EndpointPort, EndpointSubset, Endpoints, ObjectMeta, ObjectReference,
        Service, ServicePort, ServiceSpec,
    },
    AliasManager, AliasMetrics, Reconciler,
};
use maplit::btreemap;
use parking_lot::Mutex;
use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

mod dispatch;

#[derive(Clone, Debug, PartialEq, Eq)]
enum SinkCall {
    /// The declared farms and the names of their backends.
    Apply(Vec<(String, Vec<String>)>),
    DeleteFarm(String),
    DeleteBackend(String, String),
}

/// Records every request and fails the next ones with scripted statuses.
#[derive(Clone, Debug, Default)]
struct FakeSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    statuses: Arc<Mutex<VecDeque<u16>>>,
}

#[derive(Clone, Debug, Default)]
struct FakeExec {
    commands: Arc<Mutex<Vec<(ResourceId, String)>>>,
    failing: Arc<Mutex<HashSet<ResourceId>>>,
    gone: Arc<Mutex<HashSet<ResourceId>>>,
}

#[derive(Clone, Debug, Default)]
struct FakePods {
    queries: Arc<Mutex<Vec<(String, String, String)>>>,
    pods: Arc<Mutex<Vec<ResourceId>>>,
    unavailable: Arc<Mutex<bool>>,
}

struct Harness {
    registry: SharedRegistry,
    sink: FakeSink,
    exec: FakeExec,
    pods: FakePods,
    reconciler: Reconciler<FakeSink, FakeExec, FakePods>,
}

// === impl FakeSink ===

impl FakeSink {
    fn fail_next(&self, status: u16) {
        self.statuses.lock().push_back(status);
    }

    fn take_calls(&self) -> Vec<SinkCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    fn record(&self, call: SinkCall) -> Result<(), SinkError> {
        self.calls.lock().push(call);
        match self.statuses.lock().pop_front() {
            Some(status) => Err(SinkError::Status {
                status,
                body: String::new(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ConfigSink for FakeSink {
    async fn apply(&self, farms: &FarmSet) -> Result<(), SinkError> {
        let farms = farms
            .farms
            .iter()
            .map(|f| {
                let backends = f.backends.iter().map(|b| b.name.clone()).collect();
                (f.name.to_string(), backends)
            })
            .collect();
        self.record(SinkCall::Apply(farms))
    }

    async fn delete_farm(&self, farm: &FarmName) -> Result<(), SinkError> {
        self.record(SinkCall::DeleteFarm(farm.to_string()))
    }

    async fn delete_backend(&self, farm: &FarmName, backend: &str) -> Result<(), SinkError> {
        self.record(SinkCall::DeleteBackend(farm.to_string(), backend.to_string()))
    }
}

// === impl FakeExec ===

impl FakeExec {
    fn take_commands(&self) -> Vec<(ResourceId, String)> {
        std::mem::take(&mut *self.commands.lock())
    }
}

#[async_trait::async_trait]
impl BackendExec for FakeExec {
    async fn exec(&self, pod: &ResourceId, command: &str) -> anyhow::Result<()> {
        self.commands.lock().push((pod.clone(), command.to_string()));
        if self.failing.lock().contains(pod) {
            anyhow::bail!("container is not running");
        }
        Ok(())
    }

    async fn exists(&self, pod: &ResourceId) -> anyhow::Result<bool> {
        Ok(!self.gone.lock().contains(pod))
    }
}

// === impl FakePods ===

#[async_trait::async_trait]
impl PodLookup for FakePods {
    async fn pods(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> anyhow::Result<Vec<ResourceId>> {
        self.queries.lock().push((
            namespace.to_string(),
            label.to_string(),
            value.to_string(),
        ));
        if *self.unavailable.lock() {
            anyhow::bail!("the server is currently unable to handle the request");
        }
        Ok(self.pods.lock().clone())
    }
}

// === impl Harness ===

impl Harness {
    fn new() -> Self {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init()
            .ok();

        let registry = Registry::shared();
        let sink = FakeSink::default();
        let exec = FakeExec::default();
        let pods = FakePods::default();
        let aliases = AliasManager::new(
            registry.clone(),
            exec.clone(),
            pods.clone(),
            AliasMetrics::default(),
        );
        let reconciler = Reconciler::new(
            registry.clone(),
            Settings::default(),
            ["kubernetes".to_string(), "kube-dns".to_string()],
            sink.clone(),
            aliases,
        );
        Self {
            registry,
            sink,
            exec,
            pods,
            reconciler,
        }
    }

    async fn apply_service(&self, svc: Service) -> Result<(), Error> {
        self.reconciler
            .reconcile(Notification::Service(Event::Update(svc)))
            .await
    }

    async fn delete_service(&self, name: &str) -> Result<(), Error> {
        self.reconciler
            .reconcile(Notification::Service(Event::Delete(id(name))))
            .await
    }

    async fn apply_endpoints(&self, ep: Endpoints) -> Result<(), Error> {
        self.reconciler
            .reconcile(Notification::Endpoints(Event::Update(ep)))
            .await
    }
}

fn id(name: &str) -> ResourceId {
    ResourceId::new("ns-0", name)
}

fn farm(name: &str) -> FarmName {
    FarmName::from(name)
}

/// A push declaring a single farm.
fn apply(farm: &str, backends: &[&str]) -> SinkCall {
    let backends = backends.iter().map(|b| b.to_string()).collect();
    SinkCall::Apply(vec![(farm.to_string(), backends)])
}

/// Builds a cluster-IP service labeled `app=<name>` with named TCP ports.
fn mk_service(
    name: &str,
    cluster_ip: &str,
    ports: &[(&str, i32)],
    annotations: &[(&str, &str)],
) -> Service {
    Service {
        metadata: ObjectMeta {
            namespace: Some("ns-0".to_string()),
            name: Some(name.to_string()),
            labels: Some(btreemap! { "app".to_string() => name.to_string() }),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(field, value)| {
                        (
                            format!("service.kubernetes.io/kube-nftlb-load-balancer-{field}"),
                            value.to_string(),
                        )
                    })
                    .collect(),
            ),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: Some(cluster_ip.to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|(name, port)| ServicePort {
                        name: Some(name.to_string()),
                        port: *port,
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Builds an endpoints object whose addresses each reference a pod named
/// after the backend.
fn mk_endpoints(name: &str, pods: &[(&str, &str)], ports: &[(&str, i32)]) -> Endpoints {
    Endpoints {
        metadata: ObjectMeta {
            namespace: Some("ns-0".to_string()),
            name: Some(name.to_string()),
            ..Default::default()
        },
        subsets: Some(vec![EndpointSubset {
            addresses: Some(
                pods.iter()
                    .map(|(pod, ip)| EndpointAddress {
                        ip: ip.to_string(),
                        target_ref: Some(ObjectReference {
                            kind: Some("Pod".to_string()),
                            namespace: Some("ns-0".to_string()),
                            name: Some(pod.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(
                ports
                    .iter()
                    .map(|(name, port)| EndpointPort {
                        name: Some(name.to_string()),
                        port: *port,
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }]),
    }
}

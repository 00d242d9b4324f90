use crate::{
    alias::AliasManager,
    core::{BackendExec, ConfigSink, Error, FarmName, FarmSet, PodLookup, ResourceId, SinkOp},
    dispatch::{Event, Handler, Notification},
    index::{endpoints, service, Removal, Settings, SharedRegistry},
    k8s::{Endpoints, NetworkPolicy, ResourceExt, Service},
};
use ahash::AHashSet as HashSet;

/// Projects cluster notifications onto the load balancer.
///
/// Each notification is planned against the registry in a single critical
/// section; the plan's I/O then runs in order: alias operations, the
/// declarative push, and finally explicit deletions.
pub struct Reconciler<S, E, L> {
    registry: SharedRegistry,
    settings: Settings,
    ignored: HashSet<String>,
    sink: S,
    aliases: AliasManager<E, L>,
}

impl<S, E, L> Reconciler<S, E, L>
where
    S: ConfigSink,
    E: BackendExec,
    L: PodLookup,
{
    pub fn new(
        registry: SharedRegistry,
        settings: Settings,
        ignored: impl IntoIterator<Item = String>,
        sink: S,
        aliases: AliasManager<E, L>,
    ) -> Self {
        Self {
            registry,
            settings,
            ignored: ignored.into_iter().collect(),
            sink,
            aliases,
        }
    }

    pub async fn reconcile(&self, notification: Notification) -> Result<(), Error> {
        let id = notification.id();
        if self.ignored.contains(&id.name) {
            tracing::debug!(%id, "Ignoring object");
            return Ok(());
        }

        match notification {
            Notification::Service(Event::Add(svc) | Event::Update(svc)) => {
                self.apply_service(svc).await
            }
            Notification::Service(Event::Delete(id)) => self.delete_service(&id).await,
            Notification::Endpoints(Event::Add(ep) | Event::Update(ep)) => {
                self.apply_endpoints(ep).await
            }
            Notification::Endpoints(Event::Delete(id)) => self.delete_endpoints(&id).await,
            Notification::NetworkPolicy(event) => {
                self.network_policy(event);
                Ok(())
            }
        }
    }

    async fn apply_service(&self, svc: Service) -> Result<(), Error> {
        let id = ResourceId::of(&svc);
        let farms = service::synthesize_farms(&svc, &self.settings);
        let update = self.registry.write().apply_service(&id, farms)?;
        tracing::debug!(
            farms = update.farms.farms.len(),
            stale = update.stale.len(),
            aliases = update.dsr.changes.len(),
            "Applying service"
        );

        // Farms are not declared until their aliases are in place.
        let aliased = self.aliases.run(update.dsr).await;
        let pushed = if aliased.is_ok() {
            self.push(&update.farms).await
        } else {
            Ok(())
        };
        let deleted = self.delete_farms(&update.stale).await;
        aliased.and(pushed).and(deleted)
    }

    async fn delete_service(&self, id: &ResourceId) -> Result<(), Error> {
        let removal = self.registry.write().delete_service(id);
        tracing::debug!(farms = removal.farms.len(), "Deleting service");

        let retracted = self.aliases.run(removal.dsr).await;
        let deleted = self.delete_farms(&removal.farms).await;
        retracted.and(deleted)
    }

    async fn apply_endpoints(&self, ep: Endpoints) -> Result<(), Error> {
        let id = ResourceId::of(&ep);
        let targets = endpoints::targets(&ep);
        let update = self.registry.write().apply_endpoints(&id, targets);
        tracing::debug!(
            backends = update.farms.farms.iter().map(|f| f.backends.len()).sum::<usize>(),
            removals = update.removals.len(),
            aliases = update.dsr.changes.len(),
            "Applying endpoints"
        );

        let aliased = self.aliases.run(update.dsr).await;
        let pushed = if aliased.is_ok() {
            self.push(&update.farms).await
        } else {
            Ok(())
        };
        // Removed backends are never part of the declaration, so they are
        // deleted even when the push did not happen.
        let removed = self.remove_backends(&update.removals).await;
        aliased.and(pushed).and(removed)
    }

    async fn delete_endpoints(&self, id: &ResourceId) -> Result<(), Error> {
        let update = self.registry.write().delete_endpoints(id);
        tracing::debug!(removals = update.removals.len(), "Deleting endpoints");

        let retracted = self.aliases.run(update.dsr).await;
        let removed = self.remove_backends(&update.removals).await;
        retracted.and(removed)
    }

    fn network_policy(&self, event: Event<NetworkPolicy>) {
        match event {
            Event::Add(np) | Event::Update(np) => {
                let types = np
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.policy_types.as_ref())
                    .map(|types| types.join(","))
                    .unwrap_or_default();
                tracing::debug!(name = %np.name_any(), %types, "Network policy observed");
            }
            Event::Delete(id) => tracing::debug!(%id, "Network policy deleted"),
        }
    }

    async fn push(&self, farms: &FarmSet) -> Result<(), Error> {
        if farms.is_empty() {
            return Ok(());
        }
        self.sink
            .apply(farms)
            .await
            .map_err(|source| Error::SinkRequestFailed {
                op: SinkOp::Apply,
                source,
            })
    }

    /// Deletes every farm, returning the first failure.
    async fn delete_farms(&self, farms: &[FarmName]) -> Result<(), Error> {
        let mut result = Ok(());
        for farm in farms {
            if let Err(source) = self.sink.delete_farm(farm).await {
                tracing::warn!(%farm, error = %source, "Failed to delete farm");
                result = result.and(Err(Error::SinkRequestFailed {
                    op: SinkOp::DeleteFarm,
                    source,
                }));
            }
        }
        result
    }

    /// Deletes every backend, returning the first failure.
    async fn remove_backends(&self, removals: &[Removal]) -> Result<(), Error> {
        let mut result = Ok(());
        for (farm, backend) in removals {
            if let Err(source) = self.sink.delete_backend(farm, backend).await {
                tracing::warn!(%farm, %backend, error = %source, "Failed to delete backend");
                result = result.and(Err(Error::SinkRequestFailed {
                    op: SinkOp::DeleteBackend,
                    source,
                }));
            }
        }
        result
    }
}

#[async_trait::async_trait]
impl<S, E, L> Handler for Reconciler<S, E, L>
where
    S: ConfigSink + 'static,
    E: BackendExec + 'static,
    L: PodLookup + 'static,
{
    async fn handle(&self, notification: Notification) -> Result<(), Error> {
        self.reconcile(notification).await
    }
}

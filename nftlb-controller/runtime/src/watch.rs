use crate::{
    core::ResourceId,
    dispatch::{Dispatcher, Event, Notification},
    k8s::{Endpoints, NetworkPolicy, ResourceExt, Service},
};
use ahash::AHashSet as HashSet;
use parking_lot::RwLock;
use std::sync::Arc;

/// Turns watch events into add, update, and delete notifications.
///
/// The watch only reports the current state of an object, so the classifier
/// remembers which objects it has already announced. Relists are handled by
/// the indexing driver, which re-applies every listed object and deletes the
/// ones that vanished.
#[derive(Debug)]
pub struct Classifier {
    dispatcher: Dispatcher,
    services: HashSet<ResourceId>,
    endpoints: HashSet<ResourceId>,
    network_policies: HashSet<ResourceId>,
}

impl Classifier {
    pub fn shared(dispatcher: Dispatcher) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self {
            dispatcher,
            services: HashSet::new(),
            endpoints: HashSet::new(),
            network_policies: HashSet::new(),
        }))
    }
}

fn classify<K: ResourceExt>(known: &mut HashSet<ResourceId>, resource: K) -> Event<K> {
    if known.insert(ResourceId::of(&resource)) {
        Event::Add(resource)
    } else {
        Event::Update(resource)
    }
}

fn forget<K>(known: &mut HashSet<ResourceId>, namespace: String, name: String) -> Option<Event<K>> {
    let id = ResourceId::new(namespace, name);
    if known.remove(&id) {
        Some(Event::Delete(id))
    } else {
        tracing::debug!(%id, "Ignoring deletion of unknown object");
        None
    }
}

impl kubert::index::IndexNamespacedResource<Service> for Classifier {
    fn apply(&mut self, svc: Service) {
        let event = classify(&mut self.services, svc);
        self.dispatcher.dispatch(Notification::Service(event));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(event) = forget(&mut self.services, namespace, name) {
            self.dispatcher.dispatch(Notification::Service(event));
        }
    }
}

impl kubert::index::IndexNamespacedResource<Endpoints> for Classifier {
    fn apply(&mut self, ep: Endpoints) {
        let event = classify(&mut self.endpoints, ep);
        self.dispatcher.dispatch(Notification::Endpoints(event));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(event) = forget(&mut self.endpoints, namespace, name) {
            self.dispatcher.dispatch(Notification::Endpoints(event));
        }
    }
}

impl kubert::index::IndexNamespacedResource<NetworkPolicy> for Classifier {
    fn apply(&mut self, np: NetworkPolicy) {
        let event = classify(&mut self.network_policies, np);
        self.dispatcher.dispatch(Notification::NetworkPolicy(event));
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(event) = forget(&mut self.network_policies, namespace, name) {
            self.dispatcher.dispatch(Notification::NetworkPolicy(event));
        }
    }
}

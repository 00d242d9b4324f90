//! Routes notifications to a fixed pool of workers.
//!
//! Notifications are assigned to workers by object identity, so every
//! notification about one object (and about a service and its same-named
//! endpoints) is handled in order by a single worker while unrelated objects
//! are handled concurrently.

use crate::{
    core::{Error, ResourceId},
    k8s::{Endpoints, NetworkPolicy, ResourceExt, Service},
};
use ahash::RandomState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info_span, Instrument};

#[derive(Clone, Debug, PartialEq)]
pub enum Event<K> {
    Add(K),
    Update(K),
    Delete(ResourceId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    Service(Event<Service>),
    Endpoints(Event<Endpoints>),
    NetworkPolicy(Event<NetworkPolicy>),
}

/// Handles a single notification to completion.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, notification: Notification) -> Result<(), Error>;
}

#[derive(Clone, Debug)]
pub struct Dispatcher {
    workers: Arc<[mpsc::UnboundedSender<Notification>]>,
    hasher: RandomState,
}

// === impl Event ===

impl<K: ResourceExt> Event<K> {
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Add(resource) | Self::Update(resource) => ResourceId::of(resource),
            Self::Delete(id) => id.clone(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update(_) => "update",
            Self::Delete(_) => "delete",
        }
    }
}

// === impl Notification ===

impl Notification {
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Service(event) => event.id(),
            Self::Endpoints(event) => event.id(),
            Self::NetworkPolicy(event) => event.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Service(_) => "service",
            Self::Endpoints(_) => "endpoints",
            Self::NetworkPolicy(_) => "networkpolicy",
        }
    }

    pub fn event(&self) -> &'static str {
        match self {
            Self::Service(event) => event.as_str(),
            Self::Endpoints(event) => event.as_str(),
            Self::NetworkPolicy(event) => event.as_str(),
        }
    }
}

// === impl Dispatcher ===

impl Dispatcher {
    /// Spawns `workers` tasks that feed notifications to `handler`.
    ///
    /// Workers stop once every clone of the dispatcher has been dropped and
    /// their queues are drained.
    pub fn spawn<H: Handler>(workers: usize, handler: Arc<H>) -> Self {
        let workers = (0..workers.max(1))
            .map(|worker| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(run(rx, handler.clone()).instrument(info_span!("worker", worker)));
                tx
            })
            .collect();
        Self {
            workers,
            hasher: RandomState::new(),
        }
    }

    pub fn dispatch(&self, notification: Notification) {
        let id = notification.id();
        let worker = (self.hasher.hash_one(&id) % self.workers.len() as u64) as usize;
        if self.workers[worker].send(notification).is_err() {
            tracing::warn!(%id, worker, "Worker stopped; dropping notification");
        }
    }
}

async fn run<H: Handler>(mut rx: mpsc::UnboundedReceiver<Notification>, handler: Arc<H>) {
    while let Some(notification) = rx.recv().await {
        let span = info_span!(
            "notification",
            kind = notification.kind(),
            event = notification.event(),
            id = %notification.id(),
        );
        async {
            match handler.handle(notification).await {
                Ok(()) => tracing::debug!("Reconciled"),
                Err(error) if error.is_recoverable() => {
                    let error = anyhow::Error::from(error);
                    tracing::warn!(error = %format_args!("{error:#}"), "Failed to reconcile");
                }
                Err(error) => {
                    tracing::error!(%error, "Failed to reconcile; the object must be renamed");
                }
            }
        }
        .instrument(span)
        .await
    }
    tracing::debug!("Worker stopped");
}

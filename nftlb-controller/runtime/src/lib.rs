#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use nftlb_controller_core as core;
pub use nftlb_controller_k8s_api as k8s;
pub use nftlb_controller_k8s_index as index;

mod alias;
mod args;
mod dispatch;
mod exec;
mod metrics;
mod reconcile;
mod sink;
mod watch;

#[cfg(test)]
mod tests;

pub use self::{
    alias::AliasManager,
    args::Args,
    dispatch::{Dispatcher, Event, Handler, Notification},
    exec::{KubeExec, KubePods},
    metrics::{AliasMetrics, SinkMetrics},
    reconcile::Reconciler,
    sink::{HttpSink, Retry, RetryPolicy},
    watch::Classifier,
};

//! nftlb controller index
//!
//! Translates cluster objects into load balancer farm declarations and keeps
//! the correlation state the load balancer itself cannot hold:
//!
//! - Each `Service` declares one farm per port, plus a node-port twin per port
//!   when the service is reachable on every node, plus one twin per external
//!   address. Annotations on the service configure the farms' scheduling,
//!   forwarding mode, logging, persistence, and backend connection ceiling.
//! - Each `Endpoints` object lists the backends of the same-named service. Its
//!   backends are declared under the cluster farm and replicated under every
//!   twin. Backends that disappear are deleted explicitly.
//! - A farm in direct-server-return mode needs its virtual address aliased on
//!   the loopback device of every backend pod. The registry tracks which pods
//!   carry the alias and plans the operations needed to converge.
//!
//! ```text
//! [ Service ] -> [ Farm ] <-> [ Twin ]
//!                  ^   ^
//! [ Endpoints ] ---'   '--- [ DSR record ] -> [ Pod ]
//! ```
//!
//! Every notification is handled under a single write lock on the registry
//! and produces a plan: the farms to declare, the farms and backends to
//! delete, and the alias operations to run. The plan is executed by the
//! caller without the lock held.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod delta;
pub mod endpoints;
pub mod registry;
pub mod service;


pub use self::{
    annotations::FarmParams,
    delta::Removal,
    endpoints::Target,
    registry::{
        AliasChange, Bootstrap, DsrPlan, DsrRecord, DsrState, EndpointsUpdate, Registry,
        ServiceRemoval, ServiceUpdate, SharedRegistry,
    },
    service::{ServiceFarm, ServiceFarms},
};

/// Cluster-wide settings that shape farm declarations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// The node interface DSR farms forward through.
    pub dsr_iface: String,

    /// The label used to discover a DSR farm's pods before its endpoints are
    /// known.
    pub dsr_pod_label: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dsr_iface: "nftlb0".to_string(),
            dsr_pod_label: "app".to_string(),
        }
    }
}

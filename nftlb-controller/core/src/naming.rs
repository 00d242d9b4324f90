use serde::Serialize;
use std::{borrow::Borrow, fmt};

/// The port name used when a service or endpoints port is unnamed.
///
/// Service farms and endpoint backends must agree on this value or backends
/// attach to a farm that was never declared.
pub const DEFAULT_PORT_NAME: &str = "default";

const SEPARATOR: &str = "--";
const NODE_PORT: &str = "nodePort";
const EXTERNAL_IP: &str = "externalIP";

/// The identity of a farm in the load balancer's namespace.
///
/// Names are derived purely from the source object's name and port name; they
/// never consult registry state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FarmName(String);

/// Why a farm exists.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FarmRole {
    /// Exposes the service on its cluster address.
    Cluster,
    /// Exposes the service on every node at its node port.
    NodePort,
    /// Exposes the service on one of its `externalIPs`.
    ExternalIp,
}

/// Returns the port name used for farm naming, substituting
/// [`DEFAULT_PORT_NAME`] for unnamed ports.
pub fn port_name(name: Option<&str>) -> &str {
    match name {
        Some(name) if !name.is_empty() => name,
        _ => DEFAULT_PORT_NAME,
    }
}

// === impl FarmName ===

impl FarmName {
    /// The base farm for a port of the named object.
    pub fn for_port(object: &str, port: Option<&str>) -> Self {
        Self(format!("{object}{SEPARATOR}{}", port_name(port)))
    }

    /// The node-port twin of this farm.
    ///
    /// Applying this to a name that is already a twin yields a further-derived
    /// name, so callers resolve twins from base names only.
    pub fn node_port(&self) -> Self {
        Self(format!("{}{SEPARATOR}{NODE_PORT}", self.0))
    }

    /// The twin of this farm published on an external address.
    pub fn external_ip(&self, addr: &str) -> Self {
        Self(format!("{}{SEPARATOR}{EXTERNAL_IP}{SEPARATOR}{addr}", self.0))
    }

    pub fn is_node_port(&self) -> bool {
        self.0
            .strip_suffix(NODE_PORT)
            .is_some_and(|rest| rest.ends_with(SEPARATOR))
    }

    /// Tests whether this name is the node-port twin of `base`.
    pub fn is_node_port_of(&self, base: &FarmName) -> bool {
        self.0
            .strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            == Some(NODE_PORT)
    }

    /// Tests whether this name is an external-address twin of `base`.
    pub fn is_external_ip_of(&self, base: &FarmName) -> bool {
        self.0
            .strip_prefix(base.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            .and_then(|rest| rest.strip_prefix(EXTERNAL_IP))
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            .is_some_and(|addr| !addr.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FarmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Borrow<str> for FarmName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FarmName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for FarmName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

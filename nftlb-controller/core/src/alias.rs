//! Loopback aliasing of a farm's virtual address inside backend pods, used by
//! direct-server-return farms.

use crate::ResourceId;
use std::{fmt, net::IpAddr};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AliasOp {
    Add,
    Delete,
}

/// Runs a shell command in a backend's network namespace.
#[async_trait::async_trait]
pub trait BackendExec: Send + Sync {
    async fn exec(&self, pod: &ResourceId, command: &str) -> anyhow::Result<()>;

    /// Reports whether the backend still exists. Retracting an alias from a
    /// backend that is gone is a no-op.
    async fn exists(&self, pod: &ResourceId) -> anyhow::Result<bool>;
}

/// Finds the pods that carry a label value.
#[async_trait::async_trait]
pub trait PodLookup: Send + Sync {
    async fn pods(&self, namespace: &str, label: &str, value: &str)
        -> anyhow::Result<Vec<ResourceId>>;
}

// === impl AliasOp ===

impl AliasOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Delete => "del",
        }
    }

    /// Builds the shell command that applies this operation for `addr` on the
    /// loopback device.
    ///
    /// The command is guarded by a lookup of the current addresses so that
    /// re-adding a present alias or deleting an absent one succeeds.
    pub fn command(&self, addr: IpAddr) -> String {
        let prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let cidr = format!("{addr}/{prefix}");
        let present = format!("ip address show dev lo | grep -qF ' {cidr} '");
        match self {
            Self::Add => format!("{present} || ip address add {cidr} dev lo"),
            Self::Delete => format!("! {present} || ip address del {cidr} dev lo"),
        }
    }
}

impl fmt::Display for AliasOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands() {
        let addr = "10.0.0.5".parse().unwrap();
        assert_eq!(
            AliasOp::Add.command(addr),
            "ip address show dev lo | grep -qF ' 10.0.0.5/32 ' || ip address add 10.0.0.5/32 dev lo",
        );
        assert_eq!(
            AliasOp::Delete.command(addr),
            "! ip address show dev lo | grep -qF ' 10.0.0.5/32 ' || ip address del 10.0.0.5/32 dev lo",
        );

        let addr = "fd00::5".parse().unwrap();
        assert!(AliasOp::Add
            .command(addr)
            .ends_with("ip address add fd00::5/128 dev lo"));
    }
}

use crate::{AliasOp, FarmName, ResourceId, SinkError, SinkOp};
use std::net::IpAddr;

/// Failures of a single notification's reconciliation.
///
/// Malformed annotations and deletes of unknown state are not errors: the
/// former fall back to defaults and the latter are no-ops.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two distinct objects resolve to the same farm. Requires an operator to
    /// rename one of them.
    #[error("farm {farm} is declared by {owner}; {claimant} resolves to the same name")]
    NamingCollision {
        farm: FarmName,
        owner: ResourceId,
        claimant: ResourceId,
    },

    #[error("load balancer {op} request failed")]
    SinkRequestFailed {
        op: SinkOp,
        #[source]
        source: SinkError,
    },

    #[error("failed to {op} alias {addr} on {pod}")]
    AliasOperationFailed {
        op: AliasOp,
        addr: IpAddr,
        pod: ResourceId,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    /// Reports whether the error resolves itself once the load balancer or a
    /// backend recovers, as opposed to needing operator attention.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NamingCollision { .. })
    }
}

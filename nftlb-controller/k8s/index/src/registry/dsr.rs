//! Tracks which backend pods carry a direct-server-return farm's virtual
//! address on their loopback device.
//!
//! A record moves through three states:
//!
//! - `PendingTargets`: the farm is in DSR mode but no alias has been applied.
//! - `Active`: at least one pod carries the alias.
//! - `Retracting`: the farm left DSR mode (or was deleted) and its aliases are
//!   being removed. The record is dropped once retraction finishes.
//!
//! The registry only plans alias operations; they are executed without the
//! registry lock held and their outcomes are reported back through
//! [`Registry::alias_applied`] and [`Registry::alias_retracted`].

use super::Registry;
use nftlb_controller_core::{AliasOp, FarmName, ResourceId};
use std::{collections::BTreeSet, net::IpAddr};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsrRecord {
    pub addr: IpAddr,
    pub state: DsrState,

    /// Pods known to carry the alias.
    pub handles: BTreeSet<ResourceId>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DsrState {
    PendingTargets,
    Active,
    Retracting,
}

/// Alias operations required by a notification.
///
/// Within a farm, retractions are listed before additions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DsrPlan {
    pub changes: Vec<AliasChange>,

    /// Farms whose targets are not known yet and must be discovered by label.
    pub bootstraps: Vec<Bootstrap>,

    /// Farms whose records are dropped once their retractions have run.
    pub finish: Vec<FarmName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasChange {
    pub op: AliasOp,
    pub farm: FarmName,
    pub addr: IpAddr,
    pub pod: ResourceId,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bootstrap {
    pub farm: FarmName,
    pub addr: IpAddr,
    pub namespace: String,
    pub label: String,
    pub value: String,
}

// === impl DsrState ===

impl DsrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingTargets => "pending",
            Self::Active => "active",
            Self::Retracting => "retracting",
        }
    }
}

// === impl DsrPlan ===

impl DsrPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.bootstraps.is_empty() && self.finish.is_empty()
    }

    fn push(&mut self, op: AliasOp, farm: &FarmName, addr: IpAddr, pod: &ResourceId) {
        self.changes.push(AliasChange {
            op,
            farm: farm.clone(),
            addr,
            pod: pod.clone(),
        });
    }
}

// === impl Registry ===

impl Registry {
    /// Records that `pod` now carries the farm's alias.
    ///
    /// Outcomes for farms that are no longer in DSR mode, or whose address
    /// changed since the operation was planned, are ignored.
    pub fn alias_applied(&mut self, farm: &FarmName, addr: IpAddr, pod: &ResourceId) {
        let Some(record) = self.dsr.get_mut(farm) else {
            return;
        };
        if record.addr != addr || record.state == DsrState::Retracting {
            tracing::debug!(%farm, %addr, %pod, "Ignoring outdated alias");
            return;
        }
        record.handles.insert(pod.clone());
        record.state = DsrState::Active;
    }

    /// Records that `pod` no longer carries the farm's alias.
    pub fn alias_retracted(&mut self, farm: &FarmName, pod: &ResourceId) {
        let Some(record) = self.dsr.get_mut(farm) else {
            return;
        };
        record.handles.remove(pod);
        if record.state == DsrState::Active && record.handles.is_empty() {
            record.state = DsrState::PendingTargets;
        }
    }

    /// Drops a record once its retractions have run. Records that re-entered
    /// DSR mode in the meantime are kept.
    pub fn finish_retraction(&mut self, farm: &FarmName) {
        if let Some(record) = self.dsr.get(farm) {
            if record.state == DsrState::Retracting {
                if !record.handles.is_empty() {
                    tracing::warn!(%farm, pods = record.handles.len(), "Dropping DSR record with unretracted aliases");
                }
                self.dsr.remove(farm);
            }
        }
    }

    /// Ensures a DSR record exists for `farm` with address `addr`.
    ///
    /// A record that is still waiting for targets is bootstrapped from the
    /// pods already known to back the farm or, failing that, by label.
    pub(super) fn enter_dsr(
        &mut self,
        farm: &FarmName,
        addr: IpAddr,
        known: Option<BTreeSet<ResourceId>>,
        selector: Option<Bootstrap>,
        plan: &mut DsrPlan,
    ) {
        let record = self.dsr.entry(farm.clone()).or_insert_with(|| {
            tracing::debug!(%farm, %addr, "Farm entered DSR mode");
            DsrRecord {
                addr,
                state: DsrState::PendingTargets,
                handles: BTreeSet::new(),
            }
        });

        if record.addr != addr {
            tracing::info!(%farm, old = %record.addr, new = %addr, "DSR address changed");
            let old = std::mem::replace(&mut record.addr, addr);
            for pod in &record.handles {
                plan.push(AliasOp::Delete, farm, old, pod);
            }
            for pod in &record.handles {
                plan.push(AliasOp::Add, farm, addr, pod);
            }
        }

        if record.state == DsrState::Retracting {
            tracing::debug!(%farm, "Farm re-entered DSR mode");
            record.state = if record.handles.is_empty() {
                DsrState::PendingTargets
            } else {
                DsrState::Active
            };
        }

        if record.state != DsrState::PendingTargets {
            return;
        }
        match known {
            Some(pods) => {
                for pod in pods.difference(&record.handles) {
                    plan.push(AliasOp::Add, farm, addr, pod);
                }
            }
            None => match selector {
                Some(bootstrap) => plan.bootstraps.push(bootstrap),
                None => tracing::debug!(%farm, "No pods known for DSR farm"),
            },
        }
    }

    /// Marks a record for retraction and plans the removal of every alias.
    pub(super) fn leave_dsr(&mut self, farm: &FarmName, plan: &mut DsrPlan) {
        let Some(record) = self.dsr.get_mut(farm) else {
            return;
        };
        tracing::debug!(%farm, pods = record.handles.len(), "Retracting DSR aliases");
        record.state = DsrState::Retracting;
        for pod in &record.handles {
            plan.push(AliasOp::Delete, farm, record.addr, pod);
        }
        plan.finish.push(farm.clone());
    }

    /// Plans the alias operations that make the farm's handles match the pods
    /// currently backing it.
    ///
    /// A record that is still retracting has its remaining aliases removed
    /// instead, so retractions that failed are planned again.
    pub(super) fn sync_dsr_targets(
        &self,
        farm: &FarmName,
        desired: &BTreeSet<ResourceId>,
        plan: &mut DsrPlan,
    ) {
        let Some(record) = self.dsr.get(farm) else {
            return;
        };
        if record.state == DsrState::Retracting {
            tracing::debug!(%farm, pods = record.handles.len(), "Resuming retraction");
            for pod in &record.handles {
                plan.push(AliasOp::Delete, farm, record.addr, pod);
            }
            plan.finish.push(farm.clone());
            return;
        }
        for pod in record.handles.difference(desired) {
            plan.push(AliasOp::Delete, farm, record.addr, pod);
        }
        for pod in desired.difference(&record.handles) {
            plan.push(AliasOp::Add, farm, record.addr, pod);
        }
    }
}

use crate::{
    core::{AliasOp, BackendExec, Error, PodLookup},
    index::{AliasChange, Bootstrap, DsrPlan, SharedRegistry},
    metrics::AliasMetrics,
};

/// Executes the loopback alias operations planned by the registry.
///
/// Operations run without the registry lock held; each outcome is reported
/// back to the registry as soon as it is known.
pub struct AliasManager<E, L> {
    registry: SharedRegistry,
    exec: E,
    pods: L,
    metrics: AliasMetrics,
}

impl<E: BackendExec, L: PodLookup> AliasManager<E, L> {
    pub fn new(registry: SharedRegistry, exec: E, pods: L, metrics: AliasMetrics) -> Self {
        Self {
            registry,
            exec,
            pods,
            metrics,
        }
    }

    /// Runs a plan in order, stopping at the first failed operation.
    ///
    /// Operations that did not run are planned again by the next notification
    /// for the farm.
    pub async fn run(&self, plan: DsrPlan) -> Result<(), Error> {
        let DsrPlan {
            changes,
            bootstraps,
            finish,
        } = plan;

        for change in changes {
            self.apply(change).await?;
        }
        for bootstrap in bootstraps {
            self.bootstrap(bootstrap).await?;
        }
        if !finish.is_empty() {
            let mut registry = self.registry.write();
            for farm in &finish {
                registry.finish_retraction(farm);
            }
        }
        Ok(())
    }

    async fn apply(&self, change: AliasChange) -> Result<(), Error> {
        let AliasChange {
            op,
            farm,
            addr,
            pod,
        } = change;

        self.metrics.op(op);
        let result = match op {
            AliasOp::Add => self.exec.exec(&pod, &op.command(addr)).await,
            AliasOp::Delete => match self.exec.exists(&pod).await {
                Ok(true) => self.exec.exec(&pod, &op.command(addr)).await,
                Ok(false) => {
                    tracing::debug!(%farm, %pod, "Pod is gone; nothing to retract");
                    Ok(())
                }
                Err(error) => Err(error),
            },
        };
        if let Err(source) = result {
            self.metrics.failure(op);
            return Err(Error::AliasOperationFailed {
                op,
                addr,
                pod,
                source,
            });
        }

        tracing::info!(%farm, %addr, %pod, %op, "Updated loopback alias");
        let mut registry = self.registry.write();
        match op {
            AliasOp::Add => registry.alias_applied(&farm, addr, &pod),
            AliasOp::Delete => registry.alias_retracted(&farm, &pod),
        }
        Ok(())
    }

    /// Aliases the farm's address on every pod matching the service's label.
    ///
    /// Discovery is best-effort: the farm's endpoints converge the aliases once
    /// they are known.
    async fn bootstrap(&self, bootstrap: Bootstrap) -> Result<(), Error> {
        let Bootstrap {
            farm,
            addr,
            namespace,
            label,
            value,
        } = bootstrap;

        let pods = match self.pods.pods(&namespace, &label, &value).await {
            Ok(pods) => pods,
            Err(error) => {
                tracing::warn!(%farm, %namespace, selector = %format_args!("{label}={value}"), %error, "Failed to discover pods");
                return Ok(());
            }
        };
        if pods.is_empty() {
            tracing::debug!(%farm, %namespace, selector = %format_args!("{label}={value}"), "No pods to bootstrap");
        }

        for pod in pods {
            self.apply(AliasChange {
                op: AliasOp::Add,
                farm: farm.clone(),
                addr,
                pod,
            })
            .await?;
        }
        Ok(())
    }
}

use crate::{
    core::{BackendExec, PodLookup, ResourceId},
    k8s::{Api, AttachParams, Client, ListParams, Pod},
};
use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::{io::AsyncReadExt, time};

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs commands in backend pods through the cluster's exec API.
#[derive(Clone)]
pub struct KubeExec {
    client: Client,
}

/// Lists pods by label through the cluster API.
#[derive(Clone)]
pub struct KubePods {
    client: Client,
}

// === impl KubeExec ===

impl KubeExec {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn run(&self, pod: &ResourceId, command: &str) -> Result<()> {
        let api = Api::<Pod>::namespaced(self.client.clone(), &pod.namespace);
        let params = AttachParams::default()
            .stdin(false)
            .stdout(false)
            .stderr(true);
        let mut attached = api
            .exec(&pod.name, ["/bin/sh", "-c", command], &params)
            .await
            .with_context(|| format!("failed to exec in {pod}"))?;

        let mut stderr = String::new();
        if let Some(mut reader) = attached.stderr() {
            reader
                .read_to_string(&mut stderr)
                .await
                .context("failed to read stderr")?;
        }

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };
        match status {
            Some(status) if status.status.as_deref() == Some("Success") => Ok(()),
            Some(status) => bail!(
                "command failed: {}: {}",
                status.message.unwrap_or_default(),
                stderr.trim()
            ),
            None => bail!("command exited without a status"),
        }
    }
}

#[async_trait::async_trait]
impl BackendExec for KubeExec {
    async fn exec(&self, pod: &ResourceId, command: &str) -> Result<()> {
        tracing::debug!(%pod, %command, "Executing");
        time::timeout(EXEC_TIMEOUT, self.run(pod, command))
            .await
            .with_context(|| format!("exec in {pod} timed out after {EXEC_TIMEOUT:?}"))?
    }

    async fn exists(&self, pod: &ResourceId) -> Result<bool> {
        let api = Api::<Pod>::namespaced(self.client.clone(), &pod.namespace);
        let found = api
            .get_opt(&pod.name)
            .await
            .with_context(|| format!("failed to get {pod}"))?;
        Ok(found.is_some())
    }
}

// === impl KubePods ===

impl KubePods {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl PodLookup for KubePods {
    async fn pods(&self, namespace: &str, label: &str, value: &str) -> Result<Vec<ResourceId>> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{label}={value}"));
        let pods = api
            .list(&params)
            .await
            .with_context(|| format!("failed to list pods in {namespace} with {label}={value}"))?;

        // Only running pods can execute commands.
        Ok(pods
            .items
            .iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    == Some("Running")
            })
            .map(ResourceId::of)
            .collect())
    }
}

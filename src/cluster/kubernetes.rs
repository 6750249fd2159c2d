//! Kubernetes-backed cluster client
//!
//! Implements the `ClusterClient` port with kube-rs typed APIs. Each method
//! is one request except `replace_volume`, which deletes and recreates.

use crate::config::PollPolicy;
use crate::domain::ports::{
    ClusterClient, PodPhase, PodSummary, ReclaimPolicy, WorkloadKind, WorkloadRef, WorkloadScale,
};
use crate::error::{Error, Result};
use crate::migration::poll::poll_until;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, PersistentVolume, PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default connection timeout for the API client
const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);
/// Default read timeout for the API client
const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Cluster client over a kube-rs `Client`
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the kubeconfig, optionally switching to a named context
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let mut config = match context {
            Some(name) => {
                info!(context = %name, "Using kubeconfig context");
                Config::from_kubeconfig(&KubeConfigOptions {
                    context: Some(name.to_string()),
                    ..Default::default()
                })
                .await
                .map_err(|e| Error::Configuration(format!("failed to load kubeconfig: {}", e)))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::Configuration(format!("failed to infer config: {}", e)))?,
        };
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let client = Client::try_from(config)?;
        debug!("Kubernetes client initialized");
        Ok(Self::new(client))
    }

    fn claims(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn volumes(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }
}

/// Replica count a workload asks for; an unset field means one
fn desired_replicas(replicas: Option<i32>) -> u32 {
    replicas.unwrap_or(1).max(0) as u32
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(namespace).await?.is_some())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadScale>> {
        let lp = ListParams::default();
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);

        let mut workloads = Vec::new();
        for d in deployments.list(&lp).await?.items {
            let replicas = desired_replicas(d.spec.as_ref().and_then(|s| s.replicas));
            workloads.push(WorkloadScale {
                workload: WorkloadRef::new(
                    WorkloadKind::Deployment,
                    namespace,
                    d.metadata.name.unwrap_or_default(),
                ),
                replicas,
            });
        }
        for s in statefulsets.list(&lp).await?.items {
            let replicas = desired_replicas(s.spec.as_ref().and_then(|s| s.replicas));
            workloads.push(WorkloadScale {
                workload: WorkloadRef::new(
                    WorkloadKind::StatefulSet,
                    namespace,
                    s.metadata.name.unwrap_or_default(),
                ),
                replicas,
            });
        }

        debug!(namespace = %namespace, count = workloads.len(), "Listed workloads");
        Ok(workloads)
    }

    async fn scale_workload(&self, workload: &WorkloadRef, replicas: u32) -> Result<()> {
        let patch = json!({ "spec": { "replicas": replicas } });
        let pp = PatchParams::default();
        match workload.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch_scale(&workload.name, &pp, &Patch::Merge(&patch)).await?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> =
                    Api::namespaced(self.client.clone(), &workload.namespace);
                api.patch_scale(&workload.name, &pp, &Patch::Merge(&patch)).await?;
            }
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods
            .items
            .into_iter()
            .map(|p| PodSummary {
                terminating: p.metadata.deletion_timestamp.is_some(),
                phase: PodPhase::from_api(p.status.as_ref().and_then(|s| s.phase.as_deref())),
                name: p.metadata.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<PersistentVolumeClaim>> {
        Ok(self.claims(namespace).list(&ListParams::default()).await?.items)
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        Ok(self.claims(namespace).get_opt(name).await?)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.claims(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        Ok(self
            .claims(namespace)
            .create(&PostParams::default(), claim)
            .await?)
    }

    async fn remove_claim_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(key.to_string(), serde_json::Value::Null);
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.claims(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        Ok(self.volumes().get_opt(name).await?)
    }

    async fn set_reclaim_policy(&self, name: &str, policy: ReclaimPolicy) -> Result<()> {
        let patch = json!({ "spec": { "persistentVolumeReclaimPolicy": policy.as_str() } });
        self.volumes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn clear_claim_ref(&self, name: &str) -> Result<()> {
        let patch = json!({ "spec": { "claimRef": null } });
        self.volumes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn replace_volume(
        &self,
        volume: &PersistentVolume,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<PersistentVolume> {
        let name = volume
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::Validation("volume manifest has no name".into()))?;
        let api = self.volumes();

        // The CSI source is immutable, so replacement means delete + create
        if api.get_opt(&name).await?.is_some() {
            info!(volume = %name, "Deleting volume object for replacement");
            if let Err(e) = api.delete(&name, &DeleteParams::default()).await {
                let e = Error::from(e);
                if !e.is_not_found() {
                    return Err(e);
                }
            }
            poll_until(policy, cancel, &format!("volume {} to be deleted", name), || {
                let api = api.clone();
                let name = name.clone();
                async move {
                    let current = api.get_opt(&name).await?;
                    Ok::<bool, Error>(current.is_none())
                }
            })
            .await?;
        }

        let created = api.create(&PostParams::default(), volume).await?;
        info!(volume = %name, "Volume object recreated");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_replicas() {
        assert_eq!(desired_replicas(None), 1);
        assert_eq!(desired_replicas(Some(0)), 0);
        assert_eq!(desired_replicas(Some(4)), 4);
        assert_eq!(desired_replicas(Some(-1)), 0);
    }
}

//! In-memory cluster
//!
//! A `ClusterClient` that keeps claims, volumes, workloads and pods in a
//! map, journals every call, and can be told to misbehave. Pod and claim
//! deletion and binding take a few reads to settle, like a real control
//! plane.

use crate::config::{PollPolicy, MOUNTER_ATTRIBUTE};
use crate::domain::ports::{
    ClusterClient, ManifestStore, PodPhase, PodSummary, ReclaimPolicy, WorkloadRef, WorkloadScale,
    PHASE_BOUND,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ObjectReference, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, PersistentVolumeSpec,
    PersistentVolumeStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Journal
// =============================================================================

/// One call observed by the in-memory cluster or its manifest store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterCall {
    NamespaceExists { namespace: String },
    ListWorkloads { namespace: String },
    ScaleWorkload { workload: WorkloadRef, replicas: u32 },
    ListPods { namespace: String },
    DeletePod { namespace: String, name: String },
    ListClaims { namespace: String },
    GetClaim { namespace: String, name: String },
    DeleteClaim { namespace: String, name: String },
    CreateClaim { namespace: String, name: String },
    RemoveClaimAnnotation { namespace: String, name: String, key: String },
    GetVolume { name: String },
    SetReclaimPolicy { volume: String, policy: ReclaimPolicy },
    ClearClaimRef { volume: String },
    ReplaceVolume { volume: String },
    BackupClaim { namespace: String, name: String },
    BackupVolume { namespace: String, name: String },
}

impl ClusterCall {
    /// Calls that change cluster state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ClusterCall::ScaleWorkload { .. }
                | ClusterCall::DeletePod { .. }
                | ClusterCall::DeleteClaim { .. }
                | ClusterCall::CreateClaim { .. }
                | ClusterCall::RemoveClaimAnnotation { .. }
                | ClusterCall::SetReclaimPolicy { .. }
                | ClusterCall::ClearClaimRef { .. }
                | ClusterCall::ReplaceVolume { .. }
        )
    }
}

// =============================================================================
// Fault Injection
// =============================================================================

/// Ways the in-memory cluster can misbehave
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Accept reclaim policy patches without applying them
    pub ignore_reclaim_patches: bool,
    /// Recreated claims never bind
    pub never_bind: bool,
    /// Claim reads needed before a recreated claim binds
    pub bind_after_reads: u32,
    /// Scale requests for this workload fail
    pub fail_scale_of: Option<WorkloadRef>,
    /// Every call fails as if the API server were down
    pub unreachable: bool,
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone)]
struct FakePod {
    namespace: String,
    name: String,
    phase: PodPhase,
    owner: Option<WorkloadRef>,
    /// Reads left before a terminating pod disappears
    terminating: Option<u32>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeSet<String>,
    workloads: BTreeMap<WorkloadRef, u32>,
    pods: Vec<FakePod>,
    claims: BTreeMap<(String, String), PersistentVolumeClaim>,
    volumes: BTreeMap<String, PersistentVolume>,
    /// Recreated claims waiting to bind, with reads left
    pending_binds: BTreeMap<(String, String), u32>,
    /// Deleted claims held by their protection finalizer, with reads left
    terminating_claims: BTreeMap<(String, String), u32>,
    /// Volumes whose data was destroyed by a Delete reclaim
    destroyed: Vec<String>,
    faults: Faults,
    journal: Vec<ClusterCall>,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn spawn_pods(&mut self, workload: &WorkloadRef, replicas: u32) {
        let live = self
            .pods
            .iter()
            .filter(|p| p.owner.as_ref() == Some(workload) && p.terminating.is_none())
            .count() as u32;
        for i in live..replicas {
            self.pods.push(FakePod {
                namespace: workload.namespace.clone(),
                name: format!("{}-{}", workload.name, i),
                phase: PodPhase::Running,
                owner: Some(workload.clone()),
                terminating: None,
            });
        }
        for pod in self
            .pods
            .iter_mut()
            .filter(|p| p.owner.as_ref() == Some(workload) && p.terminating.is_none())
            .skip(replicas as usize)
        {
            pod.terminating = Some(2);
        }
    }

    fn try_bind(&mut self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        let Some(left) = self.pending_binds.get_mut(&key) else {
            return;
        };
        if self.faults.never_bind {
            return;
        }
        if *left > 0 {
            *left -= 1;
            return;
        }

        let Some(volume_name) = self
            .claims
            .get(&key)
            .and_then(|c| c.spec.as_ref())
            .and_then(|s| s.volume_name.clone())
        else {
            return;
        };
        let claim_uid = self.claims.get(&key).and_then(|c| c.metadata.uid.clone());
        let Some(volume) = self.volumes.get_mut(&volume_name) else {
            return;
        };
        let spec = volume.spec.get_or_insert_with(Default::default);
        let free = match &spec.claim_ref {
            None => true,
            Some(r) => r.namespace.as_deref() == Some(namespace) && r.name.as_deref() == Some(name),
        };
        if !free {
            return;
        }
        spec.claim_ref = Some(ObjectReference {
            kind: Some("PersistentVolumeClaim".to_string()),
            namespace: Some(namespace.to_string()),
            name: Some(name.to_string()),
            uid: claim_uid,
            ..Default::default()
        });
        set_volume_phase(volume, PHASE_BOUND);

        if let Some(claim) = self.claims.get_mut(&key) {
            claim.status = Some(PersistentVolumeClaimStatus {
                phase: Some(PHASE_BOUND.to_string()),
                access_modes: claim.spec.as_ref().and_then(|s| s.access_modes.clone()),
                ..Default::default()
            });
        }
        self.pending_binds.remove(&key);
    }

    /// Count down a terminating claim and finalize it once the count is spent
    fn settle_claim_deletion(&mut self, namespace: &str, name: &str) {
        let key = (namespace.to_string(), name.to_string());
        match self.terminating_claims.get_mut(&key) {
            None => {}
            Some(left) if *left > 0 => *left -= 1,
            Some(_) => {
                self.terminating_claims.remove(&key);
                if let Some(claim) = self.claims.remove(&key) {
                    self.reclaim(claim);
                }
            }
        }
    }

    /// Apply the reclaim policy of the volume a finalized claim was bound to
    fn reclaim(&mut self, claim: PersistentVolumeClaim) {
        let Some(volume_name) = claim.spec.and_then(|s| s.volume_name) else {
            return;
        };
        let policy = self
            .volumes
            .get(&volume_name)
            .and_then(|v| v.spec.as_ref())
            .and_then(|s| s.persistent_volume_reclaim_policy.clone());
        match policy.as_deref() {
            Some("Retain") => {
                if let Some(volume) = self.volumes.get_mut(&volume_name) {
                    set_volume_phase(volume, "Released");
                }
            }
            _ => {
                self.volumes.remove(&volume_name);
                self.destroyed.push(volume_name);
            }
        }
    }
}

fn set_volume_phase(volume: &mut PersistentVolume, phase: &str) {
    volume.status = Some(PersistentVolumeStatus {
        phase: Some(phase.to_string()),
        ..Default::default()
    });
}

// =============================================================================
// In-Memory Cluster
// =============================================================================

/// In-memory control plane
#[derive(Debug, Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state.lock().namespaces.insert(namespace.to_string());
    }

    /// Add a workload with running pods for each replica
    pub fn add_workload(&self, workload: WorkloadRef, replicas: u32) {
        let mut state = self.state.lock();
        state.namespaces.insert(workload.namespace.clone());
        state.spawn_pods(&workload, replicas);
        state.workloads.insert(workload, replicas);
    }

    /// Add a pod not owned by any workload
    pub fn add_pod(&self, namespace: &str, name: &str, phase: PodPhase) {
        self.state.lock().pods.push(FakePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
            phase,
            owner: None,
            terminating: None,
        });
    }

    pub fn add_claim(&self, claim: PersistentVolumeClaim) {
        let mut state = self.state.lock();
        let namespace = claim.metadata.namespace.clone().unwrap_or_default();
        let name = claim.metadata.name.clone().unwrap_or_default();
        state.namespaces.insert(namespace.clone());
        state.claims.insert((namespace, name), claim);
    }

    pub fn add_volume(&self, volume: PersistentVolume) {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.state.lock().volumes.insert(name, volume);
    }

    pub fn set_faults(&self, faults: Faults) {
        self.state.lock().faults = faults;
    }

    /// Every call so far, in order
    pub fn journal(&self) -> Vec<ClusterCall> {
        self.state.lock().journal.clone()
    }

    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.state
            .lock()
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.state.lock().volumes.get(name).cloned()
    }

    pub fn replicas(&self, workload: &WorkloadRef) -> Option<u32> {
        self.state.lock().workloads.get(workload).copied()
    }

    /// Volumes whose backing data a Delete reclaim would have destroyed
    pub fn destroyed_volumes(&self) -> Vec<String> {
        self.state.lock().destroyed.clone()
    }

    /// Manifest store that journals into this cluster and keeps copies in memory
    pub fn manifest_store(&self) -> InMemoryManifestStore {
        InMemoryManifestStore {
            state: self.state.clone(),
            claims: Arc::new(Mutex::new(BTreeMap::new())),
            volumes: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Journal the call and fail it if the cluster is unreachable
    fn enter(&self, call: ClusterCall) -> Result<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        state.journal.push(call);
        if state.faults.unreachable {
            return Err(Error::Cluster {
                operation: "request".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        let state = self.enter(ClusterCall::NamespaceExists {
            namespace: namespace.to_string(),
        })?;
        Ok(state.namespaces.contains(namespace))
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadScale>> {
        let state = self.enter(ClusterCall::ListWorkloads {
            namespace: namespace.to_string(),
        })?;
        Ok(state
            .workloads
            .iter()
            .filter(|(w, _)| w.namespace == namespace)
            .map(|(w, r)| WorkloadScale {
                workload: w.clone(),
                replicas: *r,
            })
            .collect())
    }

    async fn scale_workload(&self, workload: &WorkloadRef, replicas: u32) -> Result<()> {
        let mut state = self.enter(ClusterCall::ScaleWorkload {
            workload: workload.clone(),
            replicas,
        })?;
        if state.faults.fail_scale_of.as_ref() == Some(workload) {
            return Err(Error::Cluster {
                operation: format!("scale {}", workload),
                reason: "admission webhook denied the request".into(),
            });
        }
        if !state.workloads.contains_key(workload) {
            return Err(Error::Cluster {
                operation: format!("scale {}", workload),
                reason: "not found".into(),
            });
        }
        state.workloads.insert(workload.clone(), replicas);
        state.spawn_pods(workload, replicas);
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>> {
        let mut state = self.enter(ClusterCall::ListPods {
            namespace: namespace.to_string(),
        })?;
        state.pods.retain(|p| p.terminating != Some(0));
        let mut pods = Vec::new();
        for pod in state.pods.iter_mut().filter(|p| p.namespace == namespace) {
            pods.push(PodSummary {
                name: pod.name.clone(),
                phase: pod.phase,
                terminating: pod.terminating.is_some(),
            });
            if let Some(left) = pod.terminating.as_mut() {
                *left = left.saturating_sub(1);
            }
        }
        Ok(pods)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.enter(ClusterCall::DeletePod {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        state
            .pods
            .retain(|p| !(p.namespace == namespace && p.name == name));
        Ok(())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let state = self.enter(ClusterCall::ListClaims {
            namespace: namespace.to_string(),
        })?;
        Ok(state
            .claims
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        let mut state = self.enter(ClusterCall::GetClaim {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        state.settle_claim_deletion(namespace, name);
        state.try_bind(namespace, name);
        Ok(state
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.enter(ClusterCall::DeleteClaim {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        let key = (namespace.to_string(), name.to_string());
        let claim = state.claims.get_mut(&key).ok_or_else(|| Error::ClaimNotFound {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        if claim.metadata.deletion_timestamp.is_none() {
            claim.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        }
        state.pending_binds.remove(&key);
        state.terminating_claims.entry(key).or_insert(2);
        Ok(())
    }

    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        let mut state = self.enter(ClusterCall::CreateClaim {
            namespace: namespace.to_string(),
            name: name.clone(),
        })?;
        let key = (namespace.to_string(), name.clone());
        if state.claims.contains_key(&key) {
            return Err(Error::Cluster {
                operation: format!("create claim {}/{}", namespace, name),
                reason: "already exists".into(),
            });
        }

        let mut created = claim.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("uid-{}-{}", name, state.revision));
        created.metadata.resource_version = Some(state.next_revision());
        created.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        state.claims.insert(key.clone(), created.clone());
        let reads = state.faults.bind_after_reads;
        state.pending_binds.insert(key, reads);
        Ok(created)
    }

    async fn remove_claim_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()> {
        let mut state = self.enter(ClusterCall::RemoveClaimAnnotation {
            namespace: namespace.to_string(),
            name: name.to_string(),
            key: key.to_string(),
        })?;
        let claim = state
            .claims
            .get_mut(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| Error::ClaimNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;
        if let Some(annotations) = claim.metadata.annotations.as_mut() {
            annotations.remove(key);
        }
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>> {
        let state = self.enter(ClusterCall::GetVolume {
            name: name.to_string(),
        })?;
        Ok(state.volumes.get(name).cloned())
    }

    async fn set_reclaim_policy(&self, name: &str, policy: ReclaimPolicy) -> Result<()> {
        let mut state = self.enter(ClusterCall::SetReclaimPolicy {
            volume: name.to_string(),
            policy,
        })?;
        let ignore = state.faults.ignore_reclaim_patches;
        let volume = state
            .volumes
            .get_mut(name)
            .ok_or_else(|| Error::VolumeNotFound {
                name: name.to_string(),
            })?;
        if !ignore {
            volume
                .spec
                .get_or_insert_with(Default::default)
                .persistent_volume_reclaim_policy = Some(policy.as_str().to_string());
        }
        Ok(())
    }

    async fn clear_claim_ref(&self, name: &str) -> Result<()> {
        let mut state = self.enter(ClusterCall::ClearClaimRef {
            volume: name.to_string(),
        })?;
        let volume = state
            .volumes
            .get_mut(name)
            .ok_or_else(|| Error::VolumeNotFound {
                name: name.to_string(),
            })?;
        volume.spec.get_or_insert_with(Default::default).claim_ref = None;
        set_volume_phase(volume, "Available");
        Ok(())
    }

    async fn replace_volume(
        &self,
        volume: &PersistentVolume,
        _policy: &PollPolicy,
        _cancel: &CancellationToken,
    ) -> Result<PersistentVolume> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        let mut state = self.enter(ClusterCall::ReplaceVolume {
            volume: name.clone(),
        })?;
        let mut created = volume.clone();
        created.metadata.uid = Some(format!("uid-{}-{}", name, state.revision));
        created.metadata.resource_version = Some(state.next_revision());
        let phase = if created.spec.as_ref().and_then(|s| s.claim_ref.as_ref()).is_some() {
            PHASE_BOUND
        } else {
            "Available"
        };
        set_volume_phase(&mut created, phase);
        state.volumes.insert(name, created.clone());
        Ok(created)
    }
}

// =============================================================================
// In-Memory Manifest Store
// =============================================================================

/// Manifest store sharing the cluster journal
#[derive(Debug, Clone)]
pub struct InMemoryManifestStore {
    state: Arc<Mutex<State>>,
    claims: Arc<Mutex<BTreeMap<String, PersistentVolumeClaim>>>,
    volumes: Arc<Mutex<BTreeMap<String, PersistentVolume>>>,
}

impl InMemoryManifestStore {
    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.claims.lock().get(&format!("{}/{}", namespace, name)).cloned()
    }

    pub fn volume(&self, namespace: &str, name: &str) -> Option<PersistentVolume> {
        self.volumes.lock().get(&format!("{}/{}", namespace, name)).cloned()
    }
}

#[async_trait]
impl ManifestStore for InMemoryManifestStore {
    async fn save_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PathBuf> {
        let name = claim.metadata.name.clone().unwrap_or_default();
        self.state.lock().journal.push(ClusterCall::BackupClaim {
            namespace: namespace.to_string(),
            name: name.clone(),
        });
        let key = format!("{}/{}", namespace, name);
        self.claims.lock().insert(key.clone(), claim.clone());
        Ok(PathBuf::from(format!("memory://{}.pvc", key)))
    }

    async fn save_volume(&self, namespace: &str, volume: &PersistentVolume) -> Result<PathBuf> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.state.lock().journal.push(ClusterCall::BackupVolume {
            namespace: namespace.to_string(),
            name: name.clone(),
        });
        let key = format!("{}/{}", namespace, name);
        self.volumes.lock().insert(key.clone(), volume.clone());
        Ok(PathBuf::from(format!("memory://{}.pv", key)))
    }
}

// =============================================================================
// Object Builders
// =============================================================================

/// A claim of storage class `cephfs` bound to `volume`
pub fn bound_claim(namespace: &str, name: &str, volume: &str, mode: &str) -> PersistentVolumeClaim {
    let mut annotations = BTreeMap::new();
    annotations.insert("pv.kubernetes.io/bind-completed".to_string(), "yes".to_string());
    annotations.insert(
        crate::manifest::LAST_APPLIED_ANNOTATION.to_string(),
        "{}".to_string(),
    );
    annotations.insert("team".to_string(), "storage".to_string());

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{}", name)),
            resource_version: Some("41".to_string()),
            creation_timestamp: chrono::Utc.timestamp_opt(1_700_000_000, 0).single().map(Time),
            finalizers: Some(vec!["kubernetes.io/pvc-protection".to_string()]),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![mode.to_string()]),
            storage_class_name: Some("cephfs".to_string()),
            volume_name: Some(volume.to_string()),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some(PHASE_BOUND.to_string()),
            ..Default::default()
        }),
    }
}

/// A CSI volume bound to `namespace/claim` with reclaim policy Delete
pub fn bound_volume(
    namespace: &str,
    name: &str,
    claim: &str,
    mode: &str,
    mounter: &str,
) -> PersistentVolume {
    let mut attrs = BTreeMap::new();
    attrs.insert(MOUNTER_ATTRIBUTE.to_string(), mounter.to_string());
    attrs.insert("fsName".to_string(), "cephfs".to_string());

    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(format!("uid-{}", name)),
            resource_version: Some("77".to_string()),
            finalizers: Some(vec!["kubernetes.io/pv-protection".to_string()]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(vec![mode.to_string()]),
            persistent_volume_reclaim_policy: Some("Delete".to_string()),
            storage_class_name: Some("cephfs".to_string()),
            claim_ref: Some(ObjectReference {
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(namespace.to_string()),
                name: Some(claim.to_string()),
                uid: Some(format!("uid-{}", claim)),
                ..Default::default()
            }),
            csi: Some(CSIPersistentVolumeSource {
                driver: "cephfs.csi.ceph.com".to_string(),
                volume_handle: format!("handle-{}", name),
                volume_attributes: Some(attrs),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PersistentVolumeStatus {
            phase: Some(PHASE_BOUND.to_string()),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::WorkloadKind;

    #[tokio::test]
    async fn test_scale_down_drains_after_reads() {
        let cluster = InMemoryCluster::new();
        let web = WorkloadRef::new(WorkloadKind::Deployment, "app1", "web");
        cluster.add_workload(web.clone(), 2);

        cluster.scale_workload(&web, 0).await.unwrap();

        for _ in 0..2 {
            let pods = cluster.list_pods("app1").await.unwrap();
            assert_eq!(pods.len(), 2);
            assert!(pods.iter().all(|p| p.terminating));
        }
        assert!(cluster.list_pods("app1").await.unwrap().is_empty());
    }

    async fn read_until_gone(cluster: &InMemoryCluster, namespace: &str, name: &str) -> usize {
        let mut reads = 1;
        while cluster.get_claim(namespace, name).await.unwrap().is_some() {
            reads += 1;
            assert!(reads < 10, "claim {} never finalized", name);
        }
        reads
    }

    #[tokio::test]
    async fn test_delete_claim_honours_reclaim_policy() {
        let cluster = InMemoryCluster::new();
        cluster.add_claim(bound_claim("app1", "a", "pv-a", "ReadWriteOnce"));
        cluster.add_volume(bound_volume("app1", "pv-a", "a", "ReadWriteOnce", "kernel"));
        cluster.add_claim(bound_claim("app1", "b", "pv-b", "ReadWriteOnce"));
        cluster.add_volume(bound_volume("app1", "pv-b", "b", "ReadWriteOnce", "kernel"));

        cluster.set_reclaim_policy("pv-a", ReclaimPolicy::Retain).await.unwrap();
        cluster.delete_claim("app1", "a").await.unwrap();
        cluster.delete_claim("app1", "b").await.unwrap();
        read_until_gone(&cluster, "app1", "a").await;
        read_until_gone(&cluster, "app1", "b").await;

        assert!(cluster.volume("pv-a").is_some());
        assert!(cluster.volume("pv-b").is_none());
        assert_eq!(cluster.destroyed_volumes(), vec!["pv-b".to_string()]);
    }

    #[tokio::test]
    async fn test_deleted_claim_lingers_until_finalized() {
        let cluster = InMemoryCluster::new();
        cluster.add_claim(bound_claim("app1", "a", "pv-a", "ReadWriteOnce"));
        cluster.add_volume(bound_volume("app1", "pv-a", "a", "ReadWriteOnce", "kernel"));
        cluster.set_reclaim_policy("pv-a", ReclaimPolicy::Retain).await.unwrap();

        cluster.delete_claim("app1", "a").await.unwrap();

        let terminating = cluster.get_claim("app1", "a").await.unwrap().unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());
        let mut replacement = bound_claim("app1", "a", "pv-a", "ReadWriteMany");
        replacement.status = None;
        let conflict = cluster.create_claim("app1", &replacement).await;
        assert!(matches!(conflict, Err(Error::Cluster { .. })));

        assert_eq!(read_until_gone(&cluster, "app1", "a").await, 2);
        cluster.create_claim("app1", &replacement).await.unwrap();
    }

    #[tokio::test]
    async fn test_ignored_reclaim_patch() {
        let cluster = InMemoryCluster::new();
        cluster.add_volume(bound_volume("app1", "pv-a", "a", "ReadWriteOnce", "kernel"));
        cluster.set_faults(Faults {
            ignore_reclaim_patches: true,
            ..Default::default()
        });

        cluster.set_reclaim_policy("pv-a", ReclaimPolicy::Retain).await.unwrap();
        let volume = cluster.get_volume("pv-a").await.unwrap().unwrap();
        assert_eq!(
            volume.spec.unwrap().persistent_volume_reclaim_policy.as_deref(),
            Some("Delete")
        );
    }

    #[tokio::test]
    async fn test_unreachable_is_journaled() {
        let cluster = InMemoryCluster::new();
        cluster.set_faults(Faults {
            unreachable: true,
            ..Default::default()
        });
        assert!(cluster.namespace_exists("app1").await.is_err());
        assert_eq!(cluster.journal().len(), 1);
    }
}

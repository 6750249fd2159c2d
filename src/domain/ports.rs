//! Domain Ports - Core trait definitions for the migrator
//!
//! These traits define the boundaries between the migration state machine and
//! external systems. `cluster::KubeCluster` talks to a real control plane,
//! `cluster::InMemoryCluster` stands in for it under test.

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::{AccessMode, Mounter, PollPolicy};

// =============================================================================
// Workload Types
// =============================================================================

/// Scalable workload kinds that may hold a claim open
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl std::fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "deployment"),
            WorkloadKind::StatefulSet => write!(f, "statefulset"),
        }
    }
}

/// Identity of a workload
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    pub fn new(kind: WorkloadKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A workload together with its desired replica count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadScale {
    pub workload: WorkloadRef,
    pub replicas: u32,
}

// =============================================================================
// Pod Types
// =============================================================================

/// Lifecycle phase reported for a pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn from_api(value: Option<&str>) -> Self {
        match value {
            Some("Pending") => PodPhase::Pending,
            Some("Running") => PodPhase::Running,
            Some("Succeeded") => PodPhase::Succeeded,
            Some("Failed") => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

/// The parts of a pod the drain wait looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub phase: PodPhase,
    /// A deletion timestamp is set
    pub terminating: bool,
}

impl PodSummary {
    /// Still holding a mount: running, or on its way out
    pub fn blocks_drain(&self) -> bool {
        self.terminating || self.phase == PodPhase::Running
    }
}

// =============================================================================
// Storage Types
// =============================================================================

/// Volume reclaim policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReclaimPolicy {
    Retain,
    Delete,
    Recycle,
}

impl ReclaimPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReclaimPolicy::Retain => "Retain",
            ReclaimPolicy::Delete => "Delete",
            ReclaimPolicy::Recycle => "Recycle",
        }
    }

    pub fn from_api(value: &str) -> Option<Self> {
        match value {
            "Retain" => Some(ReclaimPolicy::Retain),
            "Delete" => Some(ReclaimPolicy::Delete),
            "Recycle" => Some(ReclaimPolicy::Recycle),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase string shared by bound claims and volumes
pub const PHASE_BOUND: &str = "Bound";

/// Flattened view of a claim and its volume, for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimReport {
    pub claim: String,
    pub volume: Option<String>,
    pub access_modes: Vec<String>,
    pub mounter: Option<Mounter>,
    pub reclaim_policy: Option<ReclaimPolicy>,
    pub claim_phase: Option<String>,
    pub volume_phase: Option<String>,
}

impl ClaimReport {
    /// Whether the pair already has the desired settings and a normal lifecycle
    pub fn is_converted(&self, mode: AccessMode, mounter: Mounter) -> bool {
        self.access_modes.len() == 1
            && self.access_modes[0] == mode.as_str()
            && self.mounter == Some(mounter)
            && self.reclaim_policy == Some(ReclaimPolicy::Delete)
            && self.claim_phase.as_deref() == Some(PHASE_BOUND)
    }
}

// =============================================================================
// Cluster Client Port
// =============================================================================

/// Port for the cluster control plane
///
/// Every call is a single request; none of them wait for convergence.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Check that a namespace exists
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// List Deployments and StatefulSets with their desired replica counts
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<WorkloadScale>>;

    /// Set the replica count of a workload
    async fn scale_workload(&self, workload: &WorkloadRef, replicas: u32) -> Result<()>;

    /// List pods in a namespace
    async fn list_pods(&self, namespace: &str) -> Result<Vec<PodSummary>>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    /// List claims in a namespace
    async fn list_claims(&self, namespace: &str) -> Result<Vec<PersistentVolumeClaim>>;

    /// Read a claim, `None` if absent
    async fn get_claim(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>>;

    /// Delete a claim
    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a claim from a clean manifest
    async fn create_claim(
        &self,
        namespace: &str,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim>;

    /// Remove one annotation from a claim
    async fn remove_claim_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()>;

    /// Read a volume, `None` if absent
    async fn get_volume(&self, name: &str) -> Result<Option<PersistentVolume>>;

    /// Patch the reclaim policy of a volume
    async fn set_reclaim_policy(&self, name: &str, policy: ReclaimPolicy) -> Result<()>;

    /// Drop the claim reference of a volume so it can be bound again
    async fn clear_claim_ref(&self, name: &str) -> Result<()>;

    /// Replace a volume object with a clean manifest, deleting the old object
    /// first when the server refuses an in-place update
    async fn replace_volume(
        &self,
        volume: &PersistentVolume,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Result<PersistentVolume>;
}

// =============================================================================
// Manifest Store Port
// =============================================================================

/// Port for durable manifest backups
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Persist a claim manifest before it is mutated
    async fn save_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PathBuf>;

    /// Persist a volume manifest before it is re-applied
    async fn save_volume(&self, namespace: &str, volume: &PersistentVolume) -> Result<PathBuf>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterClientRef = Arc<dyn ClusterClient>;
pub type ManifestStoreRef = Arc<dyn ManifestStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_display() {
        let w = WorkloadRef::new(WorkloadKind::StatefulSet, "app1", "db");
        assert_eq!(w.to_string(), "statefulset/app1/db");
    }

    #[test]
    fn test_pod_blocks_drain() {
        let running = PodSummary {
            name: "a".into(),
            phase: PodPhase::Running,
            terminating: false,
        };
        let finished = PodSummary {
            name: "b".into(),
            phase: PodPhase::Succeeded,
            terminating: false,
        };
        let leaving = PodSummary {
            name: "c".into(),
            phase: PodPhase::Failed,
            terminating: true,
        };
        assert!(running.blocks_drain());
        assert!(!finished.blocks_drain());
        assert!(leaving.blocks_drain());
    }

    #[test]
    fn test_reclaim_policy_parse() {
        assert_eq!(ReclaimPolicy::from_api("Retain"), Some(ReclaimPolicy::Retain));
        assert_eq!(ReclaimPolicy::from_api("retain"), None);
        assert_eq!(ReclaimPolicy::Delete.to_string(), "Delete");
    }
}

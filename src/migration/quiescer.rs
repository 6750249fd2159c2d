//! Workload Quiescer
//!
//! Scales every Deployment and StatefulSet in a namespace to zero and waits
//! until no pod is left holding a mount.

use crate::context::RunContext;
use crate::domain::ports::{ClusterClient, PodPhase};
use crate::domain::snapshot::ReplicaSnapshot;
use crate::error::{Error, Result};
use crate::migration::poll::poll_until;
use tracing::{debug, info, warn};

/// Scales workloads down and records what they were
pub struct WorkloadQuiescer<'a> {
    cluster: &'a dyn ClusterClient,
}

impl<'a> WorkloadQuiescer<'a> {
    pub fn new(cluster: &'a dyn ClusterClient) -> Self {
        Self { cluster }
    }

    /// Scale all workloads to zero, then wait for the namespace to drain
    ///
    /// A count is recorded only once its scale-down has been accepted, and
    /// the snapshot is persisted even when a later scale-down fails. When an
    /// earlier run aborted without being resumed, its recorded counts win
    /// over the live ones, which that run already set to zero.
    pub async fn quiesce(&self, ctx: &RunContext) -> Result<ReplicaSnapshot> {
        let namespace = ctx.namespace();
        let previous = self.unresumed_snapshot(ctx).await?;
        let workloads = self.cluster.list_workloads(namespace).await?;
        info!(namespace = %namespace, count = workloads.len(), "Quiescing workloads");

        let mut snapshot = ReplicaSnapshot::new(namespace);
        let mut result = Ok(());
        for scale in workloads {
            let replicas = previous
                .as_ref()
                .and_then(|p| p.replicas(&scale.workload))
                .unwrap_or(scale.replicas);
            if let Err(e) = self.cluster.scale_workload(&scale.workload, 0).await {
                result = Err(e);
                break;
            }
            snapshot.record(scale.workload.clone(), replicas)?;
            info!(workload = %scale.workload, replicas = replicas, "Scaled to zero");
        }

        if let Some(previous) = &previous {
            for (workload, replicas) in previous.iter() {
                if snapshot.replicas(workload).is_some() {
                    continue;
                }
                if result.is_err() {
                    // Not reached this time, still down from the earlier run
                    snapshot.record(workload.clone(), replicas)?;
                } else {
                    warn!(
                        workload = %workload,
                        replicas = replicas,
                        "Workload from the unresumed snapshot no longer exists, dropping it"
                    );
                }
            }
        }

        // Persist before anything can fail further, an aborted run needs it
        snapshot.save(&ctx.snapshot_path()).await?;
        result?;

        self.delete_finished_pods(namespace).await?;
        self.wait_drained(ctx).await?;

        info!(namespace = %namespace, "Namespace drained");
        Ok(snapshot)
    }

    /// Snapshot left behind by a run that never reached resume
    async fn unresumed_snapshot(&self, ctx: &RunContext) -> Result<Option<ReplicaSnapshot>> {
        let Some(previous) = ReplicaSnapshot::load_if_present(&ctx.snapshot_path()).await? else {
            return Ok(None);
        };
        if previous.namespace() != ctx.namespace() {
            return Err(Error::SnapshotMismatch(format!(
                "unresumed snapshot is for namespace {}, run is for {}",
                previous.namespace(),
                ctx.namespace()
            )));
        }
        warn!(
            path = %ctx.snapshot_path().display(),
            captured_at = %previous.captured_at(),
            workloads = previous.len(),
            "Found a snapshot that was never resumed, keeping its replica counts"
        );
        Ok(Some(previous))
    }

    /// Completed one-shot pods would otherwise linger in the listing
    async fn delete_finished_pods(&self, namespace: &str) -> Result<()> {
        for pod in self.cluster.list_pods(namespace).await? {
            if pod.phase == PodPhase::Succeeded && !pod.terminating {
                debug!(pod = %pod.name, "Deleting completed pod");
                self.cluster.delete_pod(namespace, &pod.name).await?;
            }
        }
        Ok(())
    }

    async fn wait_drained(&self, ctx: &RunContext) -> Result<()> {
        let namespace = ctx.namespace();
        let operation = format!("pods in {} to drain", namespace);
        poll_until(ctx.drain_policy(), ctx.cancel_token(), &operation, || async move {
            let pods = self.cluster.list_pods(namespace).await?;
            let blocking: Vec<_> = pods.iter().filter(|p| p.blocks_drain()).collect();
            if !blocking.is_empty() {
                info!(namespace = %namespace, remaining = blocking.len(), "Waiting for pods to stop");
            }
            Ok::<bool, Error>(blocking.is_empty())
        })
        .await
    }
}

//! Workload Resumer
//!
//! Puts every workload back to the replica count it had before the run.

use crate::context::RunContext;
use crate::domain::ports::ClusterClient;
use crate::domain::snapshot::ReplicaSnapshot;
use crate::error::{Error, Result};
use tracing::info;

/// Restores replica counts from a snapshot
pub struct WorkloadResumer<'a> {
    cluster: &'a dyn ClusterClient,
}

impl<'a> WorkloadResumer<'a> {
    pub fn new(cluster: &'a dyn ClusterClient) -> Self {
        Self { cluster }
    }

    /// Scale each recorded workload back; the first failure ends the run
    ///
    /// The snapshot is consumed so it cannot be applied twice in one run.
    pub async fn resume(&self, ctx: &RunContext, snapshot: ReplicaSnapshot) -> Result<()> {
        if snapshot.namespace() != ctx.namespace() {
            return Err(Error::SnapshotMismatch(format!(
                "snapshot is for namespace {}, run is for {}",
                snapshot.namespace(),
                ctx.namespace()
            )));
        }

        info!(namespace = %ctx.namespace(), count = snapshot.len(), "Resuming workloads");
        for (workload, replicas) in snapshot.iter() {
            self.cluster.scale_workload(workload, replicas).await?;
            info!(workload = %workload, replicas = replicas, "Scaled back");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{ClusterCall, Faults, InMemoryCluster};
    use crate::config::{AccessMode, MigratorConfig, Mounter};
    use crate::domain::ports::{WorkloadKind, WorkloadRef};
    use assert_matches::assert_matches;
    use tokio_test::assert_ok;

    fn context(namespace: &str) -> RunContext {
        RunContext::new(
            &MigratorConfig::default(),
            namespace,
            AccessMode::ReadWriteMany,
            Mounter::Kernel,
        )
        .unwrap()
    }

    fn snapshot(entries: &[(&WorkloadRef, u32)]) -> ReplicaSnapshot {
        let mut snapshot = ReplicaSnapshot::new("app1");
        for (workload, replicas) in entries {
            snapshot.record((*workload).clone(), *replicas).unwrap();
        }
        snapshot
    }

    #[tokio::test]
    async fn test_restores_recorded_counts() {
        let cluster = InMemoryCluster::new();
        let web = WorkloadRef::new(WorkloadKind::Deployment, "app1", "web");
        let idle = WorkloadRef::new(WorkloadKind::Deployment, "app1", "idle");
        let db = WorkloadRef::new(WorkloadKind::StatefulSet, "app1", "db");
        cluster.add_workload(web.clone(), 0);
        cluster.add_workload(idle.clone(), 0);
        cluster.add_workload(db.clone(), 0);

        assert_ok!(
            WorkloadResumer::new(&cluster)
                .resume(&context("app1"), snapshot(&[(&web, 3), (&idle, 0), (&db, 1)]))
                .await
        );

        assert_eq!(cluster.replicas(&web), Some(3));
        assert_eq!(cluster.replicas(&idle), Some(0));
        assert_eq!(cluster.replicas(&db), Some(1));
        let scales = cluster
            .journal()
            .iter()
            .filter(|c| matches!(c, ClusterCall::ScaleWorkload { .. }))
            .count();
        assert_eq!(scales, 3);
    }

    #[tokio::test]
    async fn test_first_failure_is_fatal() {
        let cluster = InMemoryCluster::new();
        let a = WorkloadRef::new(WorkloadKind::Deployment, "app1", "a");
        let b = WorkloadRef::new(WorkloadKind::Deployment, "app1", "b");
        cluster.add_workload(a.clone(), 0);
        cluster.add_workload(b.clone(), 0);
        cluster.set_faults(Faults {
            fail_scale_of: Some(a.clone()),
            ..Default::default()
        });

        let result = WorkloadResumer::new(&cluster)
            .resume(&context("app1"), snapshot(&[(&a, 2), (&b, 5)]))
            .await;

        assert_matches!(result, Err(Error::Cluster { .. }));
        assert_eq!(cluster.replicas(&b), Some(0));
    }

    #[tokio::test]
    async fn test_foreign_snapshot_rejected() {
        let cluster = InMemoryCluster::new();
        let result = WorkloadResumer::new(&cluster)
            .resume(&context("app2"), snapshot(&[]))
            .await;

        assert_matches!(result, Err(Error::SnapshotMismatch(_)));
        assert!(cluster.journal().is_empty());
    }
}

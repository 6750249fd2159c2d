//! End-to-end migration runs against the in-memory cluster

use assert_matches::assert_matches;
use pvc_mode_migrator::cluster::memory::{bound_claim, bound_volume, ClusterCall, Faults};
use pvc_mode_migrator::manifest::{
    bound_volume_name, claim_phase, reclaim_policy, volume_access_modes, volume_mounter,
};
use pvc_mode_migrator::{
    AccessMode, Error, ErrorClass, FsManifestStore, InMemoryCluster, MigratorConfig, Mounter,
    Orchestrator, PollPolicy, ReclaimPolicy, ReplicaSnapshot, RunContext, WorkloadKind,
    WorkloadRef,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn context(dir: &TempDir) -> RunContext {
    let poll = PollPolicy::new(Duration::from_millis(1), Duration::from_secs(2));
    let config = MigratorConfig {
        work_root: dir.path().to_path_buf(),
        drain: poll,
        bind: poll,
        removal: poll,
        ..Default::default()
    };
    RunContext::new(&config, "app1", AccessMode::ReadWriteMany, Mounter::Fuse).unwrap()
}

/// `data-pvc` bound to `pv-data`, single writer, kernel mounter, plus two workloads
fn app1() -> (InMemoryCluster, WorkloadRef, WorkloadRef) {
    let cluster = InMemoryCluster::new();
    cluster.add_claim(bound_claim("app1", "data-pvc", "pv-data", "ReadWriteOnce"));
    cluster.add_volume(bound_volume("app1", "pv-data", "data-pvc", "ReadWriteOnce", "kernel"));

    let web = WorkloadRef::new(WorkloadKind::Deployment, "app1", "web");
    let db = WorkloadRef::new(WorkloadKind::StatefulSet, "app1", "db");
    cluster.add_workload(web.clone(), 3);
    cluster.add_workload(db.clone(), 1);
    (cluster, web, db)
}

fn count(journal: &[ClusterCall], wanted: impl Fn(&ClusterCall) -> bool) -> usize {
    journal.iter().filter(|c| wanted(c)).count()
}

#[tokio::test]
async fn successful_conversion() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let (cluster, web, db) = app1();
    cluster.set_faults(Faults {
        bind_after_reads: 3,
        ..Default::default()
    });
    let store = FsManifestStore::new(ctx.backup_dir());
    let orchestrator = Orchestrator::new(Arc::new(cluster.clone()), Arc::new(store.clone()));

    let summary = orchestrator.run(&ctx).await.unwrap();
    assert_eq!(summary.converted, vec!["data-pvc".to_string()]);

    let volume = cluster.volume("pv-data").unwrap();
    assert_eq!(volume_access_modes(&volume), vec!["ReadWriteMany".to_string()]);
    assert_eq!(volume_mounter(&volume), Some(Mounter::Fuse));
    assert_eq!(reclaim_policy(&volume), Some(ReclaimPolicy::Delete));

    let claim = cluster.claim("app1", "data-pvc").unwrap();
    assert_eq!(bound_volume_name(&claim), Some("pv-data"));
    assert_eq!(claim_phase(&claim), Some("Bound"));

    assert_eq!(cluster.replicas(&web), Some(3));
    assert_eq!(cluster.replicas(&db), Some(1));
    assert!(cluster.destroyed_volumes().is_empty());

    // Backups hold the pre-conversion claim and the reconfigured volume
    let claim_backup = store.load_claim("app1", "data-pvc").await.unwrap();
    assert_eq!(
        claim_backup.spec.unwrap().access_modes,
        Some(vec!["ReadWriteOnce".to_string()])
    );
    let volume_backup = store.load_volume("app1", "pv-data").await.unwrap();
    assert_eq!(reclaim_policy(&volume_backup), Some(ReclaimPolicy::Retain));
    assert_eq!(volume_mounter(&volume_backup), Some(Mounter::Fuse));
}

#[tokio::test]
async fn snapshot_matches_pre_run_replicas() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let (cluster, web, db) = app1();
    let idle = WorkloadRef::new(WorkloadKind::Deployment, "app1", "idle");
    cluster.add_workload(idle.clone(), 0);
    let orchestrator = Orchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.manifest_store()),
    );

    orchestrator.run(&ctx).await.unwrap();

    // A completed run retires its snapshot
    assert!(!ctx.snapshot_path().exists());
    let snapshot = ReplicaSnapshot::load(&ctx.retired_snapshot_path()).await.unwrap();
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.replicas(&web), Some(3));
    assert_eq!(snapshot.replicas(&db), Some(1));
    assert_eq!(snapshot.replicas(&idle), Some(0));

    // Restored exactly the recorded workloads, once each
    let journal = cluster.journal();
    for (workload, replicas) in snapshot.iter() {
        let restores = count(&journal, |c| {
            *c == ClusterCall::ScaleWorkload {
                workload: workload.clone(),
                replicas,
            }
        });
        assert!(restores >= 1, "{} not restored", workload);
        assert_eq!(cluster.replicas(workload), Some(replicas));
    }
}

#[tokio::test]
async fn safety_gate_failure() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let (cluster, web, _) = app1();
    cluster.set_faults(Faults {
        ignore_reclaim_patches: true,
        ..Default::default()
    });
    let orchestrator = Orchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.manifest_store()),
    );

    let err = orchestrator.run(&ctx).await.unwrap_err();
    assert_matches!(err, Error::SafetyGate { ref volume, .. } if volume == "pv-data");
    assert_eq!(err.class(), ErrorClass::SafetyGate);
    assert!(!err.is_data_at_risk());

    let journal = cluster.journal();
    assert_eq!(count(&journal, |c| matches!(c, ClusterCall::DeleteClaim { .. })), 0);
    assert_eq!(count(&journal, |c| matches!(c, ClusterCall::CreateClaim { .. })), 0);
    assert_eq!(count(&journal, |c| matches!(c, ClusterCall::ReplaceVolume { .. })), 0);
    assert!(cluster.claim("app1", "data-pvc").is_some());

    // The run stops without resuming; the persisted snapshot brings workloads back
    assert_eq!(cluster.replicas(&web), Some(0));
    orchestrator.resume(&ctx).await.unwrap();
    assert_eq!(cluster.replicas(&web), Some(3));
}

#[tokio::test]
async fn migrate_again_after_abort_restores_original_replicas() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let (cluster, web, db) = app1();
    cluster.set_faults(Faults {
        ignore_reclaim_patches: true,
        ..Default::default()
    });
    let orchestrator = Orchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.manifest_store()),
    );

    let err = orchestrator.run(&ctx).await.unwrap_err();
    assert_matches!(err, Error::SafetyGate { .. });
    assert_eq!(cluster.replicas(&web), Some(0));
    assert!(ctx.snapshot_path().exists());

    // Operator repairs the cause and migrates again instead of resuming
    cluster.set_faults(Faults::default());
    let summary = orchestrator.run(&ctx).await.unwrap();

    assert_eq!(summary.converted, vec!["data-pvc".to_string()]);
    assert_eq!(cluster.replicas(&web), Some(3));
    assert_eq!(cluster.replicas(&db), Some(1));
    assert!(!ctx.snapshot_path().exists());
    let retired = ReplicaSnapshot::load(&ctx.retired_snapshot_path()).await.unwrap();
    assert_eq!(retired.replicas(&web), Some(3));
}

#[tokio::test]
async fn no_eligible_claims() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let cluster = InMemoryCluster::new();
    let mut claim = bound_claim("app1", "data-pvc", "pv-data", "ReadWriteOnce");
    claim.spec.as_mut().unwrap().storage_class_name = Some("rbd".into());
    cluster.add_claim(claim);
    cluster.add_workload(WorkloadRef::new(WorkloadKind::Deployment, "app1", "web"), 2);
    let orchestrator = Orchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.manifest_store()),
    );

    let err = orchestrator.run(&ctx).await.unwrap_err();
    assert_matches!(err, Error::NoEligibleClaims { .. });
    assert_eq!(err.class(), ErrorClass::Precondition);

    let journal = cluster.journal();
    assert_eq!(count(&journal, |c| matches!(c, ClusterCall::ListWorkloads { .. })), 0);
    assert_eq!(count(&journal, |c| matches!(c, ClusterCall::ScaleWorkload { .. })), 0);
    assert!(!journal.iter().any(ClusterCall::is_mutation));
}

#[tokio::test]
async fn eligibility_is_computed_once() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let (cluster, _, _) = app1();
    cluster.add_claim(bound_claim("app1", "logs-pvc", "pv-logs", "ReadWriteOnce"));
    cluster.add_volume(bound_volume("app1", "pv-logs", "logs-pvc", "ReadWriteOnce", "kernel"));
    let orchestrator = Orchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.manifest_store()),
    );

    let summary = orchestrator.run(&ctx).await.unwrap();

    assert_eq!(
        summary.converted,
        vec!["data-pvc".to_string(), "logs-pvc".to_string()]
    );
    let listings = count(&cluster.journal(), |c| matches!(c, ClusterCall::ListClaims { .. }));
    assert_eq!(listings, 1);
}

#[tokio::test]
async fn bind_timeout_keeps_data() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir);
    let (cluster, web, _) = app1();
    cluster.set_faults(Faults {
        never_bind: true,
        ..Default::default()
    });
    let orchestrator = Orchestrator::new(
        Arc::new(cluster.clone()),
        Arc::new(cluster.manifest_store()),
    );

    let err = orchestrator.run(&ctx).await.unwrap_err();
    assert!(err.is_data_at_risk());
    assert_eq!(err.class(), ErrorClass::Timeout);

    let volume = cluster.volume("pv-data").unwrap();
    assert_eq!(reclaim_policy(&volume), Some(ReclaimPolicy::Retain));
    assert!(cluster.destroyed_volumes().is_empty());
    assert_eq!(cluster.replicas(&web), Some(0));
}

//! Migration Orchestrator
//!
//! Runs one namespace through:
//! - precondition checks (namespace exists, at least one eligible claim)
//! - workload quiesce, with the replica snapshot persisted
//! - serial conversion of every eligible claim
//! - workload resume
//!
//! Any error ends the run where it happened. Workloads are not resumed after
//! a failed conversion; the persisted snapshot is used by `resume` instead,
//! or picked up by the next run. It is retired once its counts are restored.

use crate::context::RunContext;
use crate::domain::ports::{ClaimReport, ClusterClientRef, ManifestStoreRef};
use crate::domain::snapshot::ReplicaSnapshot;
use crate::error::{Error, Result};
use crate::manifest::{bound_volume_name, claim_storage_class, report};
use crate::migration::converter::{ConversionOutcome, VolumeConverter};
use crate::migration::quiescer::WorkloadQuiescer;
use crate::migration::resumer::WorkloadResumer;
use serde::Serialize;
use tracing::{error, info, warn};

// =============================================================================
// Run Summary
// =============================================================================

/// What a completed run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub namespace: String,
    /// Workloads quiesced and resumed
    pub workloads: usize,
    /// Claims recreated with the new settings
    pub converted: Vec<String>,
    /// Claims that already had the new settings
    pub skipped: Vec<String>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Sequences quiesce, conversion and resume for one namespace
pub struct Orchestrator {
    cluster: ClusterClientRef,
    store: ManifestStoreRef,
}

impl Orchestrator {
    pub fn new(cluster: ClusterClientRef, store: ManifestStoreRef) -> Self {
        Self { cluster, store }
    }

    /// Full migration of the namespace in `ctx`
    pub async fn run(&self, ctx: &RunContext) -> Result<RunSummary> {
        let namespace = ctx.namespace();
        let claims = self.eligible_claims(ctx).await?;
        info!(
            namespace = %namespace,
            claims = ?claims,
            access_mode = %ctx.access_mode(),
            mounter = %ctx.mounter(),
            "Starting migration"
        );

        ctx.prepare_dirs().await?;
        let snapshot = WorkloadQuiescer::new(self.cluster.as_ref())
            .quiesce(ctx)
            .await?;

        let mut summary = RunSummary {
            namespace: namespace.to_string(),
            workloads: snapshot.len(),
            ..Default::default()
        };

        let converter = VolumeConverter::new(self.cluster.as_ref(), self.store.as_ref());
        for claim in &claims {
            match converter.convert(ctx, claim).await {
                Ok(ConversionOutcome::Converted) => summary.converted.push(claim.clone()),
                Ok(ConversionOutcome::AlreadyConverted) => summary.skipped.push(claim.clone()),
                Err(e) => {
                    error!(namespace = %namespace, claim = %claim, error = %e, "Conversion failed");
                    warn!(
                        snapshot = %ctx.snapshot_path().display(),
                        "Workloads left scaled down, run `resume` or `migrate` again once the claim is repaired"
                    );
                    return Err(e);
                }
            }
        }

        WorkloadResumer::new(self.cluster.as_ref())
            .resume(ctx, snapshot)
            .await?;
        ReplicaSnapshot::retire(&ctx.snapshot_path(), &ctx.retired_snapshot_path()).await?;

        info!(
            namespace = %namespace,
            converted = summary.converted.len(),
            skipped = summary.skipped.len(),
            workloads = summary.workloads,
            "Migration complete"
        );
        Ok(summary)
    }

    /// Restore replica counts from the snapshot an earlier run persisted
    pub async fn resume(&self, ctx: &RunContext) -> Result<ReplicaSnapshot> {
        let path = ctx.snapshot_path();
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::Configuration(format!(
                "no replica snapshot at {}",
                path.display()
            )));
        }
        let snapshot = ReplicaSnapshot::load(&path).await?;
        info!(
            namespace = %snapshot.namespace(),
            captured_at = %snapshot.captured_at(),
            workloads = snapshot.len(),
            "Loaded replica snapshot"
        );

        WorkloadResumer::new(self.cluster.as_ref())
            .resume(ctx, snapshot.clone())
            .await?;
        ReplicaSnapshot::retire(&path, &ctx.retired_snapshot_path()).await?;
        Ok(snapshot)
    }

    /// Read-only view of the claims a run would convert
    pub async fn inspect(&self, ctx: &RunContext) -> Result<Vec<ClaimReport>> {
        self.ensure_namespace(ctx).await?;

        let mut reports = Vec::new();
        for claim in self.cluster.list_claims(ctx.namespace()).await? {
            if claim_storage_class(&claim) != Some(ctx.storage_class()) {
                continue;
            }
            let volume = match bound_volume_name(&claim) {
                Some(name) => self.cluster.get_volume(name).await?,
                None => None,
            };
            reports.push(report(&claim, volume.as_ref()));
        }
        Ok(reports)
    }

    /// Names of the claims in the target storage class, computed once per run
    pub async fn eligible_claims(&self, ctx: &RunContext) -> Result<Vec<String>> {
        self.ensure_namespace(ctx).await?;

        let mut names: Vec<String> = self
            .cluster
            .list_claims(ctx.namespace())
            .await?
            .iter()
            .filter(|c| claim_storage_class(c) == Some(ctx.storage_class()))
            .filter_map(|c| c.metadata.name.clone())
            .collect();
        names.sort();

        if names.is_empty() {
            return Err(Error::NoEligibleClaims {
                namespace: ctx.namespace().to_string(),
                storage_class: ctx.storage_class().to_string(),
            });
        }
        Ok(names)
    }

    async fn ensure_namespace(&self, ctx: &RunContext) -> Result<()> {
        if !self.cluster.namespace_exists(ctx.namespace()).await? {
            return Err(Error::NamespaceNotFound {
                namespace: ctx.namespace().to_string(),
            });
        }
        Ok(())
    }
}

//! Volume Converter
//!
//! Takes one bound claim/volume pair through
//! backup → retain → gate → detach → reconfigure → reapply → rebind.
//!
//! Every step is a separate API call whose effect is durable as soon as it
//! is accepted. Nothing is rolled back; a failure after the claim has been
//! deleted is reported as [`Error::ConversionAborted`] and the backups are
//! the way back.

use crate::config::{AccessMode, Mounter};
use crate::context::RunContext;
use crate::domain::ports::{ClusterClient, ManifestStore, ReclaimPolicy};
use crate::error::{Error, Result};
use crate::manifest::{
    bound_volume_name, claim_for_recreate, reclaim_policy, report, volume_for_recreate,
    LAST_APPLIED_ANNOTATION,
};
use crate::migration::poll::poll_until;
use crate::migration::waiter::BindingWaiter;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

// =============================================================================
// Conversion Types
// =============================================================================

/// Result of converting one claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// The pair was recreated and is bound with the new settings
    Converted,
    /// The pair already had the desired settings, nothing was touched
    AlreadyConverted,
}

/// Working state for one claim
#[derive(Debug, Clone)]
pub struct ConversionTarget {
    pub claim: PersistentVolumeClaim,
    pub volume: PersistentVolume,
    pub claim_backup: Option<PathBuf>,
    pub volume_backup: Option<PathBuf>,
    pub desired_access_mode: AccessMode,
    pub desired_mounter: Mounter,
}

impl ConversionTarget {
    fn claim_name(&self) -> &str {
        self.claim.metadata.name.as_deref().unwrap_or_default()
    }

    fn volume_name(&self) -> &str {
        self.volume.metadata.name.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Volume Converter
// =============================================================================

/// Per-claim conversion state machine
pub struct VolumeConverter<'a> {
    cluster: &'a dyn ClusterClient,
    store: &'a dyn ManifestStore,
}

impl<'a> VolumeConverter<'a> {
    pub fn new(cluster: &'a dyn ClusterClient, store: &'a dyn ManifestStore) -> Self {
        Self { cluster, store }
    }

    /// Convert one claim to the run's access mode and mounter
    pub async fn convert(&self, ctx: &RunContext, claim_name: &str) -> Result<ConversionOutcome> {
        let namespace = ctx.namespace();
        let mut target = self.resolve(ctx, claim_name).await?;

        let current = report(&target.claim, Some(&target.volume));
        if current.is_converted(target.desired_access_mode, target.desired_mounter) {
            info!(
                claim = %claim_name,
                volume = %target.volume_name(),
                "Claim already has the desired settings, skipping"
            );
            return Ok(ConversionOutcome::AlreadyConverted);
        }

        info!(
            claim = %claim_name,
            volume = %target.volume_name(),
            from_modes = ?current.access_modes,
            from_mounter = ?current.mounter,
            to_mode = %target.desired_access_mode,
            to_mounter = %target.desired_mounter,
            "Converting claim"
        );

        target.claim_backup = Some(self.store.save_claim(namespace, &target.claim).await?);
        self.retain_and_confirm(target.volume_name()).await?;

        self.cluster.delete_claim(namespace, claim_name).await?;
        info!(claim = %claim_name, "Claim deletion requested, volume retained");

        if let Err(e) = self.rebuild(ctx, &mut target).await {
            error!(
                claim = %claim_name,
                volume = %target.volume_name(),
                claim_backup = ?target.claim_backup,
                volume_backup = ?target.volume_backup,
                error = %e,
                "Conversion aborted after claim deletion, restore from backups"
            );
            return Err(Error::ConversionAborted {
                claim: format!("{}/{}", namespace, claim_name),
                source: Box::new(e),
            });
        }

        info!(claim = %claim_name, volume = %target.volume_name(), "Claim converted");
        Ok(ConversionOutcome::Converted)
    }

    /// Step 1: read the claim and the volume it is bound to
    async fn resolve(&self, ctx: &RunContext, claim_name: &str) -> Result<ConversionTarget> {
        let namespace = ctx.namespace();
        let claim = self
            .cluster
            .get_claim(namespace, claim_name)
            .await?
            .ok_or_else(|| Error::ClaimNotFound {
                namespace: namespace.to_string(),
                name: claim_name.to_string(),
            })?;

        let volume_name = bound_volume_name(&claim)
            .ok_or_else(|| Error::ClaimNotBound {
                namespace: namespace.to_string(),
                name: claim_name.to_string(),
            })?
            .to_string();

        let volume = self
            .cluster
            .get_volume(&volume_name)
            .await?
            .ok_or(Error::VolumeNotFound { name: volume_name })?;

        // The mounter lives in the CSI attributes; without them there is nothing to set
        if volume.spec.as_ref().and_then(|s| s.csi.as_ref()).is_none() {
            return Err(Error::Validation(format!(
                "volume {} of claim {}/{} has no CSI source, mounter cannot be set",
                volume.metadata.name.as_deref().unwrap_or_default(),
                namespace,
                claim_name
            )));
        }

        Ok(ConversionTarget {
            claim,
            volume,
            claim_backup: None,
            volume_backup: None,
            desired_access_mode: ctx.access_mode(),
            desired_mounter: ctx.mounter(),
        })
    }

    /// Steps 3-4: patch Retain, then refuse to go on unless a fresh read says so
    async fn retain_and_confirm(&self, volume_name: &str) -> Result<()> {
        self.cluster
            .set_reclaim_policy(volume_name, ReclaimPolicy::Retain)
            .await?;

        let observed = self
            .cluster
            .get_volume(volume_name)
            .await?
            .as_ref()
            .and_then(reclaim_policy);

        if observed != Some(ReclaimPolicy::Retain) {
            let observed = observed
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unset".to_string());
            error!(volume = %volume_name, observed = %observed, "Reclaim policy did not take effect");
            return Err(Error::SafetyGate {
                volume: volume_name.to_string(),
                observed,
            });
        }

        info!(volume = %volume_name, "Reclaim policy confirmed as Retain");
        Ok(())
    }

    /// Steps 6-13, run only once the claim is gone
    async fn rebuild(&self, ctx: &RunContext, target: &mut ConversionTarget) -> Result<()> {
        let namespace = ctx.namespace().to_string();
        let claim_name = target.claim_name().to_string();
        let volume_name = target.volume_name().to_string();

        self.wait_claim_removed(ctx, &claim_name).await?;

        // Detach
        self.cluster.clear_claim_ref(&volume_name).await?;

        // Reconfigure
        let live = self
            .cluster
            .get_volume(&volume_name)
            .await?
            .ok_or_else(|| Error::VolumeNotFound {
                name: volume_name.clone(),
            })?;
        let updated = volume_for_recreate(&live, target.desired_access_mode, target.desired_mounter);
        if reclaim_policy(&updated) != Some(ReclaimPolicy::Retain) {
            return Err(Error::SafetyGate {
                volume: volume_name.clone(),
                observed: reclaim_policy(&updated)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "unset".to_string()),
            });
        }
        target.volume_backup = Some(self.store.save_volume(&namespace, &updated).await?);

        // Reapply
        target.volume = self
            .cluster
            .replace_volume(&updated, ctx.removal_policy(), ctx.cancel_token())
            .await?;
        info!(volume = %volume_name, "Volume reapplied");

        let fresh = claim_for_recreate(&target.claim, target.desired_access_mode);
        target.claim = self.cluster.create_claim(&namespace, &fresh).await?;
        info!(claim = %claim_name, "Claim recreated");

        self.cluster
            .remove_claim_annotation(&namespace, &claim_name, LAST_APPLIED_ANNOTATION)
            .await?;

        // Rebind
        BindingWaiter::new(self.cluster, *ctx.bind_policy(), ctx.cancel_token().clone())
            .wait_for_bound(&namespace, &claim_name, &volume_name)
            .await?;

        self.cluster
            .set_reclaim_policy(&volume_name, ReclaimPolicy::Delete)
            .await?;
        if let Some(policy) = self
            .cluster
            .get_volume(&volume_name)
            .await?
            .as_ref()
            .and_then(reclaim_policy)
            .filter(|p| *p != ReclaimPolicy::Delete)
        {
            warn!(volume = %volume_name, policy = %policy, "Reclaim policy not yet restored to Delete");
        }
        Ok(())
    }

    /// A deleted claim stays readable until its protection finalizer clears.
    /// Detaching the volume before that lets the binder hand it back to the
    /// terminating claim, and recreating the claim would conflict.
    async fn wait_claim_removed(&self, ctx: &RunContext, claim_name: &str) -> Result<()> {
        let namespace = ctx.namespace();
        let operation = format!("claim {}/{} to be removed", namespace, claim_name);
        poll_until(ctx.removal_policy(), ctx.cancel_token(), &operation, || async move {
            let gone = self.cluster.get_claim(namespace, claim_name).await?.is_none();
            if !gone {
                debug!(claim = %claim_name, "Claim still terminating");
            }
            Ok::<bool, Error>(gone)
        })
        .await?;
        info!(claim = %claim_name, "Claim removed");
        Ok(())
    }
}

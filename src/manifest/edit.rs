//! Structured manifest edits
//!
//! Claims and volumes are recreated from their own manifests. These helpers
//! turn a live object into something the API server accepts as a fresh
//! create, and rewrite the two fields the migration changes.

use crate::config::{AccessMode, Mounter, MOUNTER_ATTRIBUTE};
use crate::domain::ports::{ClaimReport, ReclaimPolicy};
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Provenance annotation written by client-side declarative apply
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Annotations the binder controller puts on bound claims
const BINDING_ANNOTATIONS: &[&str] = &[
    "pv.kubernetes.io/bind-completed",
    "pv.kubernetes.io/bound-by-controller",
];

/// Remove fields the server owns
pub fn strip_server_fields(meta: &mut ObjectMeta) {
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.managed_fields = None;
    meta.generation = None;
    meta.finalizers = None;
}

/// Clean creation manifest for a volume with new access mode and mounter
///
/// The claim reference is dropped so the recreated claim can bind it. The
/// reclaim policy is carried over unchanged.
pub fn volume_for_recreate(
    volume: &PersistentVolume,
    mode: AccessMode,
    mounter: Mounter,
) -> PersistentVolume {
    let mut clean = volume.clone();
    strip_server_fields(&mut clean.metadata);
    clean.status = None;

    let spec = clean.spec.get_or_insert_with(Default::default);
    spec.claim_ref = None;
    spec.access_modes = Some(vec![mode.as_str().to_string()]);
    if let Some(csi) = spec.csi.as_mut() {
        csi.volume_attributes
            .get_or_insert_with(Default::default)
            .insert(MOUNTER_ATTRIBUTE.to_string(), mounter.as_str().to_string());
    }
    clean
}

/// Clean creation manifest for a claim with a new access mode
///
/// `volumeName` is kept so the claim binds straight back to its volume.
pub fn claim_for_recreate(claim: &PersistentVolumeClaim, mode: AccessMode) -> PersistentVolumeClaim {
    let mut clean = claim.clone();
    strip_server_fields(&mut clean.metadata);
    clean.status = None;

    if let Some(annotations) = clean.metadata.annotations.as_mut() {
        for key in BINDING_ANNOTATIONS {
            annotations.remove(*key);
        }
    }

    let spec = clean.spec.get_or_insert_with(Default::default);
    spec.access_modes = Some(vec![mode.as_str().to_string()]);
    clean
}

/// Name of the volume a claim is bound to
pub fn bound_volume_name(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.volume_name.as_deref())
        .filter(|n| !n.is_empty())
}

pub fn claim_storage_class(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.spec.as_ref().and_then(|s| s.storage_class_name.as_deref())
}

pub fn claim_access_modes(claim: &PersistentVolumeClaim) -> Vec<String> {
    claim
        .spec
        .as_ref()
        .and_then(|s| s.access_modes.clone())
        .unwrap_or_default()
}

pub fn claim_phase(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.status.as_ref().and_then(|s| s.phase.as_deref())
}

pub fn volume_phase(volume: &PersistentVolume) -> Option<&str> {
    volume.status.as_ref().and_then(|s| s.phase.as_deref())
}

pub fn volume_access_modes(volume: &PersistentVolume) -> Vec<String> {
    volume
        .spec
        .as_ref()
        .and_then(|s| s.access_modes.clone())
        .unwrap_or_default()
}

pub fn reclaim_policy(volume: &PersistentVolume) -> Option<ReclaimPolicy> {
    volume
        .spec
        .as_ref()
        .and_then(|s| s.persistent_volume_reclaim_policy.as_deref())
        .and_then(ReclaimPolicy::from_api)
}

pub fn volume_mounter(volume: &PersistentVolume) -> Option<Mounter> {
    volume
        .spec
        .as_ref()
        .and_then(|s| s.csi.as_ref())
        .and_then(|csi| csi.volume_attributes.as_ref())
        .and_then(|attrs| attrs.get(MOUNTER_ATTRIBUTE))
        .and_then(|m| Mounter::from_attribute(m))
}

/// Flatten a claim and its volume for reporting
pub fn report(claim: &PersistentVolumeClaim, volume: Option<&PersistentVolume>) -> ClaimReport {
    ClaimReport {
        claim: claim.metadata.name.clone().unwrap_or_default(),
        volume: bound_volume_name(claim).map(str::to_string),
        access_modes: claim_access_modes(claim),
        mounter: volume.and_then(volume_mounter),
        reclaim_policy: volume.and_then(reclaim_policy),
        claim_phase: claim_phase(claim).map(str::to_string),
        volume_phase: volume.and_then(volume_phase).map(str::to_string),
    }
}

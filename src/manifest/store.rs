//! Filesystem manifest backups
//!
//! One YAML file per claim and per volume, named from namespace and resource
//! name so an operator can find it without the run log.

use crate::domain::ports::ManifestStore;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Writes manifest backups below a directory
#[derive(Debug, Clone)]
pub struct FsManifestStore {
    dir: PathBuf,
}

impl FsManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backup path of a claim
    pub fn claim_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.pvc.yaml", namespace, name))
    }

    /// Backup path of a volume
    pub fn volume_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.pv.yaml", namespace, name))
    }

    async fn write<T: Serialize>(&self, path: PathBuf, object: &T) -> Result<PathBuf> {
        let body = serde_yaml::to_string(object)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;

        info!(path = %path.display(), "Manifest backup written");
        Ok(path)
    }

    /// Read a claim backup back, for recovery
    pub async fn load_claim(&self, namespace: &str, name: &str) -> Result<PersistentVolumeClaim> {
        let body = tokio::fs::read_to_string(self.claim_path(namespace, name)).await?;
        Ok(serde_yaml::from_str(&body)?)
    }

    /// Read a volume backup back, for recovery
    pub async fn load_volume(&self, namespace: &str, name: &str) -> Result<PersistentVolume> {
        let body = tokio::fs::read_to_string(self.volume_path(namespace, name)).await?;
        Ok(serde_yaml::from_str(&body)?)
    }
}

fn object_name(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, kind: &str) -> Result<String> {
    meta.name
        .clone()
        .ok_or_else(|| Error::Validation(format!("{} manifest has no name", kind)))
}

#[async_trait]
impl ManifestStore for FsManifestStore {
    async fn save_claim(&self, namespace: &str, claim: &PersistentVolumeClaim) -> Result<PathBuf> {
        let name = object_name(&claim.metadata, "PersistentVolumeClaim")?;
        self.write(self.claim_path(namespace, &name), claim).await
    }

    async fn save_volume(&self, namespace: &str, volume: &PersistentVolume) -> Result<PathBuf> {
        let name = object_name(&volume.metadata, "PersistentVolume")?;
        self.write(self.volume_path(namespace, &name), volume).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::{bound_claim, bound_volume};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_claim_backup_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsManifestStore::new(dir.path().join("backups"));
        let claim = bound_claim("app1", "data-pvc", "pv-data", "ReadWriteOnce");

        let path = store.save_claim("app1", &claim).await.unwrap();
        assert_eq!(path, dir.path().join("backups/app1-data-pvc.pvc.yaml"));

        let loaded = store.load_claim("app1", "data-pvc").await.unwrap();
        assert_eq!(loaded, claim);
    }

    #[tokio::test]
    async fn test_volume_backup_named_by_namespace() {
        let dir = TempDir::new().unwrap();
        let store = FsManifestStore::new(dir.path());
        let volume = bound_volume("app1", "pv-data", "data-pvc", "ReadWriteOnce", "kernel");

        let path = store.save_volume("app1", &volume).await.unwrap();
        assert!(path.ends_with("app1-pv-data.pv.yaml"));

        let body = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(body.contains("cephfs.csi.ceph.com"));
    }

    #[tokio::test]
    async fn test_nameless_manifest_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsManifestStore::new(dir.path());
        let claim = PersistentVolumeClaim::default();
        assert!(store.save_claim("app1", &claim).await.is_err());
    }
}

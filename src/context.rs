//! Run Context
//!
//! Everything a run needs to know about *where* it is, built once at
//! startup and handed by reference to every component.

use crate::config::{AccessMode, MigratorConfig, Mounter, PollPolicy};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Directory name used when no explicit context was given
const ACTIVE_CONTEXT_DIR: &str = "active-context";

/// Immutable per-run state
#[derive(Debug, Clone)]
pub struct RunContext {
    namespace: String,
    storage_class: String,
    access_mode: AccessMode,
    mounter: Mounter,
    work_dir: PathBuf,
    started_at: DateTime<Utc>,
    drain: PollPolicy,
    bind: PollPolicy,
    removal: PollPolicy,
    cancel: CancellationToken,
}

impl RunContext {
    /// Build the context for one namespace
    ///
    /// Artifacts live under `<work_root>/<context>/<namespace>/`.
    pub fn new(
        config: &MigratorConfig,
        namespace: impl Into<String>,
        access_mode: AccessMode,
        mounter: Mounter,
    ) -> Result<Self> {
        let namespace = namespace.into();
        validate_dns_label("namespace", &namespace)?;
        if config.storage_class.is_empty() {
            return Err(Error::Validation("storage class must not be empty".into()));
        }

        let cluster_dir = config
            .context
            .as_deref()
            .map(sanitize_path_segment)
            .unwrap_or_else(|| ACTIVE_CONTEXT_DIR.to_string());
        let work_dir = config.work_root.join(cluster_dir).join(&namespace);

        Ok(Self {
            namespace,
            storage_class: config.storage_class.clone(),
            access_mode,
            mounter,
            work_dir,
            started_at: Utc::now(),
            drain: config.drain,
            bind: config.bind,
            removal: config.removal,
            cancel: CancellationToken::new(),
        })
    }

    /// Create the working and backup directories
    pub async fn prepare_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.backup_dir()).await?;
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn storage_class(&self) -> &str {
        &self.storage_class
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn mounter(&self) -> Mounter {
        self.mounter
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.work_dir.join("backups")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.work_dir.join("replicas.json")
    }

    /// Where the snapshot is moved once its counts have been restored
    pub fn retired_snapshot_path(&self) -> PathBuf {
        self.work_dir.join("replicas.resumed.json")
    }

    /// File name of the run log inside [`RunContext::work_dir`]
    pub fn log_file_name(&self) -> String {
        format!("migration-{}.log", self.started_at.format("%Y%m%dT%H%M%SZ"))
    }

    pub fn drain_policy(&self) -> &PollPolicy {
        &self.drain
    }

    pub fn bind_policy(&self) -> &PollPolicy {
        &self.bind
    }

    pub fn removal_policy(&self) -> &PollPolicy {
        &self.removal
    }

    /// Token observed by every wait in this run
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Kubernetes namespace names are RFC 1123 labels
fn validate_dns_label(what: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::Validation(format!("invalid {}: {:?}", what, value)))
    }
}

fn sanitize_path_segment(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

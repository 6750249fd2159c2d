//! Replica Snapshot
//!
//! Replica counts captured when workloads are quiesced. The snapshot is
//! written to disk right after capture so an aborted run can still be
//! resumed by hand.

use crate::domain::ports::{WorkloadKind, WorkloadRef};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// On-disk record for one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
    pub replicas: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    namespace: String,
    captured_at: DateTime<Utc>,
    workloads: Vec<ReplicaRecord>,
}

/// Replica counts keyed by workload, captured once per run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSnapshot {
    namespace: String,
    captured_at: DateTime<Utc>,
    entries: BTreeMap<WorkloadRef, u32>,
}

impl ReplicaSnapshot {
    /// Start an empty snapshot for a namespace
    pub(crate) fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            captured_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Record a workload's replica count; a workload may be recorded once
    pub(crate) fn record(&mut self, workload: WorkloadRef, replicas: u32) -> Result<()> {
        if workload.namespace != self.namespace {
            return Err(Error::SnapshotMismatch(format!(
                "{} is outside namespace {}",
                workload, self.namespace
            )));
        }
        if self.entries.contains_key(&workload) {
            return Err(Error::SnapshotMismatch(format!("{} recorded twice", workload)));
        }
        self.entries.insert(workload, replicas);
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Recorded replica count of a workload
    pub fn replicas(&self, workload: &WorkloadRef) -> Option<u32> {
        self.entries.get(workload).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in stable (kind, namespace, name) order
    pub fn iter(&self) -> impl Iterator<Item = (&WorkloadRef, u32)> {
        self.entries.iter().map(|(w, r)| (w, *r))
    }

    fn to_file(&self) -> SnapshotFile {
        SnapshotFile {
            namespace: self.namespace.clone(),
            captured_at: self.captured_at,
            workloads: self
                .entries
                .iter()
                .map(|(w, r)| ReplicaRecord {
                    kind: w.kind,
                    namespace: w.namespace.clone(),
                    name: w.name.clone(),
                    replicas: *r,
                })
                .collect(),
        }
    }

    fn from_file(file: SnapshotFile) -> Result<Self> {
        let mut snapshot = Self {
            namespace: file.namespace,
            captured_at: file.captured_at,
            entries: BTreeMap::new(),
        };
        for record in file.workloads {
            let workload = WorkloadRef::new(record.kind, record.namespace, record.name);
            snapshot.record(workload, record.replicas)?;
        }
        Ok(snapshot)
    }

    /// Write the snapshot as JSON
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.to_file())?;
        tokio::fs::write(path, data).await?;
        debug!(path = %path.display(), workloads = self.len(), "Replica snapshot written");
        Ok(())
    }

    /// Read a snapshot written by [`ReplicaSnapshot::save`]
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        let file: SnapshotFile = serde_json::from_slice(&data)?;
        Self::from_file(file)
    }

    /// Like [`ReplicaSnapshot::load`], but a missing file is `None`
    pub async fn load_if_present(path: &Path) -> Result<Option<Self>> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(None);
        }
        Self::load(path).await.map(Some)
    }

    /// Move a snapshot whose counts have been restored out of the way
    ///
    /// A later run only trusts an unretired file, so this must happen after
    /// a successful resume and never before.
    pub async fn retire(path: &Path, retired: &Path) -> Result<()> {
        tokio::fs::rename(path, retired).await?;
        debug!(from = %path.display(), to = %retired.display(), "Replica snapshot retired");
        Ok(())
    }
}

//! Migrator configuration
//!
//! Enumerated target settings plus the defaults that are not worth a CLI
//! flag of their own.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Volume attribute carrying the CSI mount strategy
pub const MOUNTER_ATTRIBUTE: &str = "mounter";

// =============================================================================
// Target Settings
// =============================================================================

/// Desired claim/volume access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum AccessMode {
    /// Read-write by a single node
    #[value(name = "ReadWriteOnce", alias = "rwo", alias = "one-writer")]
    ReadWriteOnce,
    /// Read-write by many nodes
    #[value(name = "ReadWriteMany", alias = "rwx", alias = "many-writer")]
    ReadWriteMany,
}

impl AccessMode {
    /// Kubernetes API spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadWriteOnce => "ReadWriteOnce",
            AccessMode::ReadWriteMany => "ReadWriteMany",
        }
    }

    /// Parse the Kubernetes API spelling
    pub fn from_api(value: &str) -> Option<Self> {
        match value {
            "ReadWriteOnce" => Some(AccessMode::ReadWriteOnce),
            "ReadWriteMany" => Some(AccessMode::ReadWriteMany),
            _ => None,
        }
    }
}

impl Default for AccessMode {
    fn default() -> Self {
        AccessMode::ReadWriteMany
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-side mount strategy for the filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mounter {
    Kernel,
    Fuse,
}

impl Mounter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mounter::Kernel => "kernel",
            Mounter::Fuse => "fuse",
        }
    }

    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "kernel" => Some(Mounter::Kernel),
            "fuse" => Some(Mounter::Fuse),
            _ => None,
        }
    }
}

impl Default for Mounter {
    fn default() -> Self {
        Mounter::Kernel
    }
}

impl std::fmt::Display for Mounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Poll Policy
// =============================================================================

/// Fixed-interval polling bounded by a total wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two checks
    pub interval: Duration,
    /// Give up once this much time has passed
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

// =============================================================================
// Migrator Configuration
// =============================================================================

/// Configuration shared by every run
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Only claims of this storage class are converted
    pub storage_class: String,
    /// Root directory for run artifacts
    pub work_root: PathBuf,
    /// Kubeconfig context, `None` for the active one
    pub context: Option<String>,
    /// Wait for workload pods to drain
    pub drain: PollPolicy,
    /// Wait for the recreated claim and volume to bind
    pub bind: PollPolicy,
    /// Wait for a replaced volume object to disappear
    pub removal: PollPolicy,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            storage_class: "cephfs".to_string(),
            work_root: PathBuf::from("pvc-migrations"),
            context: None,
            drain: PollPolicy::new(Duration::from_secs(5), Duration::from_secs(900)),
            bind: PollPolicy::new(Duration::from_secs(5), Duration::from_secs(600)),
            removal: PollPolicy::new(Duration::from_secs(2), Duration::from_secs(120)),
        }
    }
}

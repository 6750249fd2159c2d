//! PVC Mode Migrator
//!
//! Converts the bound PersistentVolumeClaims of one namespace to a new access
//! mode and CSI mounter in place, without losing the data behind them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Orchestrator                             │
//! │     preconditions → quiesce → convert (per claim) → resume          │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌──────────────────────┐  ┌────────────────┐   │
//! │  │   Workload     │  │   Volume Converter   │  │   Workload     │   │
//! │  │   Quiescer     │  │  backup → Retain →   │  │   Resumer      │   │
//! │  │ (snapshot out) │  │  gate → recreate →   │  │ (snapshot in)  │   │
//! │  └───────┬────────┘  │  bind → Delete       │  └───────┬────────┘   │
//! │          │           └──────────┬───────────┘          │            │
//! │          │             ┌────────┴────────┐             │            │
//! │          │             │ Binding Waiter  │             │            │
//! │          │             │ (bounded poll)  │             │            │
//! │          │             └────────┬────────┘             │            │
//! ├──────────┴──────────────────────┼──────────────────────┴────────────┤
//! │             Ports: ClusterClient  ·  ManifestStore                  │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────┐   │
//! │  │ KubeCluster (kube-rs)       │  │ FsManifestStore (YAML)      │   │
//! │  │ InMemoryCluster (testing)   │  │ InMemoryManifestStore       │   │
//! │  └─────────────────────────────┘  └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`migration`]: Quiesce, conversion, binding waits, resume and sequencing
//! - [`cluster`]: `ClusterClient` implementations
//! - [`manifest`]: Structured manifest edits and backups
//! - [`domain`]: Ports, workload identities and the replica snapshot
//! - [`config`] / [`context`]: Run settings and per-run state
//! - [`error`]: Error types and exit codes

pub mod cluster;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod manifest;
pub mod migration;

// Re-export commonly used types
pub use cluster::KubeCluster;
#[cfg(any(test, feature = "test-support"))]
pub use cluster::InMemoryCluster;

pub use config::{AccessMode, MigratorConfig, Mounter, PollPolicy};

pub use context::RunContext;

pub use domain::ports::{
    ClaimReport, ClusterClient, ClusterClientRef, ManifestStore, ManifestStoreRef, ReclaimPolicy,
    WorkloadKind, WorkloadRef,
};
pub use domain::snapshot::ReplicaSnapshot;

pub use error::{Error, ErrorClass, Result};

pub use manifest::FsManifestStore;

pub use migration::{ConversionOutcome, Orchestrator, RunSummary, VolumeConverter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

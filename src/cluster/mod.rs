//! Cluster adapters
//!
//! - `kubernetes`: the real control plane via kube-rs
//! - `memory`: an in-memory control plane with a call journal, built for
//!   unit tests and behind the `test-support` feature

pub mod kubernetes;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use self::kubernetes::KubeCluster;
#[cfg(any(test, feature = "test-support"))]
pub use self::memory::{ClusterCall, Faults, InMemoryCluster, InMemoryManifestStore};

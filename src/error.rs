//! Error types for the PVC mode migrator
//!
//! Every failure is fatal to the run. The variants exist so the caller can
//! tell *where* the run stopped: before any mutation, at the safety gate, or
//! after a claim was already deleted and manual recovery is required.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the migrator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation / Configuration Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    #[error("Namespace not found: {namespace}")]
    NamespaceNotFound { namespace: String },

    #[error("No claims of storage class {storage_class} in namespace {namespace}")]
    NoEligibleClaims {
        namespace: String,
        storage_class: String,
    },

    // =========================================================================
    // Conversion Errors
    // =========================================================================
    #[error("Claim not found: {namespace}/{name}")]
    ClaimNotFound { namespace: String, name: String },

    #[error("Claim {namespace}/{name} is not bound to a volume")]
    ClaimNotBound { namespace: String, name: String },

    #[error("Volume not found: {name}")]
    VolumeNotFound { name: String },

    #[error("Safety gate failed for volume {volume}: reclaim policy reads {observed}, expected Retain")]
    SafetyGate { volume: String, observed: String },

    #[error("Conversion of claim {claim} aborted after deletion: {source}")]
    ConversionAborted {
        claim: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Polling Errors
    // =========================================================================
    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout { operation: String, waited: Duration },

    #[error("Cancelled while waiting for {operation}")]
    Cancelled { operation: String },

    // =========================================================================
    // Snapshot Errors
    // =========================================================================
    #[error("Replica snapshot mismatch: {0}")]
    SnapshotMismatch(String),

    // =========================================================================
    // Cluster API Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cluster operation failed: {operation}: {reason}")]
    Cluster { operation: String, reason: String },

    // =========================================================================
    // Local IO / Encoding Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse classification of errors, used for exit codes and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input, nothing touched
    Validation,
    /// Namespace or eligibility check failed, nothing touched
    Precondition,
    /// Retain could not be confirmed, claim never deleted
    SafetyGate,
    /// A bounded wait ran out or was cancelled
    Timeout,
    /// The cluster API rejected or failed a call
    Cluster,
    /// Local filesystem or encoding failure
    Local,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_) | Error::Configuration(_) => ErrorClass::Validation,

            Error::NamespaceNotFound { .. } | Error::NoEligibleClaims { .. } => {
                ErrorClass::Precondition
            }

            Error::SafetyGate { .. } => ErrorClass::SafetyGate,

            Error::Timeout { .. } | Error::Cancelled { .. } => ErrorClass::Timeout,

            Error::ConversionAborted { source, .. } => source.class(),

            Error::ClaimNotFound { .. }
            | Error::ClaimNotBound { .. }
            | Error::VolumeNotFound { .. }
            | Error::Kube(_)
            | Error::Cluster { .. } => ErrorClass::Cluster,

            Error::SnapshotMismatch(_) | Error::Io(_) | Error::Json(_) | Error::Yaml(_) => {
                ErrorClass::Local
            }
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self.class() {
            ErrorClass::Validation => 2,
            ErrorClass::Precondition => 3,
            ErrorClass::SafetyGate => 4,
            ErrorClass::Timeout => 5,
            ErrorClass::Cluster => 6,
            ErrorClass::Local => 7,
        }
    }

    /// True when the run stopped after a claim was deleted but before it was
    /// rebound; only the manifest backups can restore it.
    pub fn is_data_at_risk(&self) -> bool {
        matches!(self, Error::ConversionAborted { .. })
    }

    /// Check if this error came from the cluster API transport
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Service(_)) | Error::Kube(kube::Error::HyperError(_)))
    }

    /// Check if the cluster reported the resource as absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(resp)) => resp.code == 404,
            Error::ClaimNotFound { .. } | Error::VolumeNotFound { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for the migrator
pub type Result<T> = std::result::Result<T, Error>;

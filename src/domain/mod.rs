//! Domain layer - Port definitions and the replica snapshot
//!
//! This module defines the traits (ports) that cluster and storage adapters
//! implement, following hexagonal architecture principles.

pub mod ports;
pub mod snapshot;

pub use ports::*;
pub use snapshot::*;

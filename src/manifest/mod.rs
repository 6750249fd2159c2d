//! Manifest handling
//!
//! Field-level edits on typed claim/volume objects and the backup store that
//! keeps a copy of each before it is destroyed.

pub mod edit;
pub mod store;

pub use edit::*;
pub use store::*;

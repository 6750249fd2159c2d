//! Migration
//!
//! The run itself: quiesce, per-claim conversion, binding waits and resume,
//! sequenced by the [`Orchestrator`].

pub mod converter;
pub mod orchestrator;
pub mod poll;
pub mod quiescer;
pub mod resumer;
pub mod waiter;

pub use converter::{ConversionOutcome, ConversionTarget, VolumeConverter};
pub use orchestrator::{Orchestrator, RunSummary};
pub use poll::poll_until;
pub use quiescer::WorkloadQuiescer;
pub use resumer::WorkloadResumer;
pub use waiter::BindingWaiter;

//! Deployment orchestration for the berth agent
//!
//! The idempotent state machine that deploys, verifies, stops and
//! removes one application's container and its associated resources,
//! the per-application concurrency guard in front of it, and the
//! garbage collector that sweeps resources orphaned by out-of-band
//! deletions.

pub mod guard;
pub mod orchestrator;
pub mod reconcile;

pub use guard::{DeployGuard, DeployToken};
pub use orchestrator::Orchestrator;
pub use reconcile::{Reconciler, SweepReport};

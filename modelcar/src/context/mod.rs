//! Context handed to stage bodies.
//!
//! This module provides:
//! - Run identity (run, stage, attempt)
//! - Resolved stage inputs
//! - The per-attempt stage context carrying the cancellation token

mod identity;
mod inputs;
mod stage;

pub use identity::RunIdentity;
pub use inputs::StageInputs;
pub use stage::StageContext;

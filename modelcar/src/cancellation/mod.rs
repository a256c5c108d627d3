//! Cooperative cancellation for pipeline runs.
//!
//! A [`CancellationToken`] is supplied by the caller of a run. The executor
//! stops scheduling once it is raised and hands it to stage bodies so
//! in-flight external work can be aborted.

mod token;

pub use token::CancellationToken;

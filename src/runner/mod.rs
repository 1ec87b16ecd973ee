// src/runner/mod.rs

//! Run orchestration.
//!
//! - [`local`] drives a run end to end and records its outcome.
//! - [`detached`] relaunches the program for asynchronous runs.

pub mod detached;
pub mod local;

pub use detached::DetachedLaunch;
pub use local::{LocalRunner, RunPlan, RunRequest, cancel_and_record, wait_and_record};

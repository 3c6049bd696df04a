//! Run orchestration.
//!
//! This module owns the run lifecycle (start/cancel/reset), the per-stage
//! state table, and the stream transport task. UI/CLI layers call into the
//! controller and render its state read-only.

mod controller;
mod stream;
mod tracker;

pub use controller::{RunController, ValidationError};

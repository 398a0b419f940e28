//! Drift apply: the diff and ownership engine.
//!
//! [`Planner`] classifies every inventory bucket and applies the ownership
//! policy to produce an ordered action list; [`realize`] runs that list
//! through the cluster clients.

#![forbid(unsafe_code)]

pub mod diff;
pub mod options;
pub mod plan;
pub mod realize;

pub use diff::{diff_bucket, is_identical, DiffPair, DiffResult};
pub use options::{DiffStrategy, ReconcileOptions};
pub use plan::{Action, ActionPayload, Planner, Reason};
pub use realize::{realize, RealizeReport};

//! Readiness detection.
//!
//! This module provides bounded, fixed-interval polling and the conditions
//! the add-on definitions wait on.

mod conditions;
mod poller;

pub use conditions::{wait_for, ConditionError, ReadinessCondition};
pub use poller::{poll_until_ready, PollSettings};

//! Provisioning sagas.
//!
//! A saga is an ordered list of [`Step`]s. The [`SagaExecutor`] runs them
//! forward and, when one fails, compensates the completed ones in reverse.

mod executor;
mod step;

pub use executor::{RunBounds, SagaExecutor, SagaOutcome, SharedUsage};
pub(crate) use executor::{delete_ref, get_ref};
pub use step::{ActionKind, Step, StepAction, StepDescription};

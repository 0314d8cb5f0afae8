//! Session-wide configuration and diagnostics for the ttac toolchain.
//!
//! A [Session] bundles the options that stay fixed for the duration of one
//! scheduling run, together with the diagnostics boundary types every other
//! crate reports through. Nothing in here is mutated while the scheduler is
//! running.

mod errors;
mod options;

pub use self::{
    errors::{LimitingResource, ScheduleError},
    options::{AntidependenceLevel, LoopSchedulingMode, SchedulerOptions, PROLOG_CYCLE_BIAS},
};

/// The boundary type for verification-style checks.
///
/// Fatal, user-facing failures use the typed [ScheduleError] kinds instead;
/// `Report` is for internal consistency checks whose message is the whole
/// story (graph verifiers, canonical dump comparisons, and the like).
pub type Report = miette::Report;

/// Convenience alias used at fallible boundaries throughout the workspace.
pub type ScheduleResult<T> = Result<T, ScheduleError>;

//! The local transformations the scheduler composes.
//!
//! Each module holds one transformation family; all of them follow the
//! apply/undo discipline of [crate::reversible].

pub mod assign;
pub mod bypass;
pub mod dre;
pub mod front;
pub mod push;
pub mod regcopy;
pub mod schedule;
pub mod share;
pub mod swap;
pub mod unschedule;

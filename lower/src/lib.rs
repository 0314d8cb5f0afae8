//! Code-generation collaborators of the scheduler.
//!
//! These passes run before scheduling, on the program representation the
//! code generator hands over: [MissingOpLowering] replaces operations the
//! target cannot execute (by decomposition or emulation calls keyed by
//! type-decorated [Footprint]s), and [ConstantTransformer] legalizes
//! immediates no encoding of the machine can carry.

mod constants;
mod footprint;
mod missing;

pub use self::{
    constants::ConstantTransformer,
    footprint::{Footprint, OperandExtension},
    missing::{EmulationCall, Lowering, MissingOpLowering},
};

use cranelift_entity::entity_impl;
use smallvec::SmallVec;
use ttac_machine::{FuId, OpId};

use crate::node::MoveNodeId;

/// A program operation instance.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoId(u32);
entity_impl!(PoId, "po");

/// One instance of an operation: the operand writes that feed it and the
/// result reads that drain it.
///
/// The triggering input, once scheduled, fixes the function unit and the
/// start cycle; every other input must land on the same unit no later than
/// the trigger, and each output appears `latency(output)` cycles after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramOperation {
    pub op: OpId,
    /// Operand-writing nodes, in operand order as built. Operand sharing can
    /// make one node serve several operations, so membership here is not
    /// exclusive.
    pub inputs: SmallVec<[MoveNodeId; 4]>,
    /// Result-reading nodes.
    pub outputs: SmallVec<[MoveNodeId; 2]>,
    /// Function unit chosen by the resource manager, once any input or
    /// output is assigned.
    pub fu: Option<FuId>,
}

impl ProgramOperation {
    pub fn new(op: OpId) -> Self {
        Self {
            op,
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
            fu: None,
        }
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn contains(&self, node: MoveNodeId) -> bool {
        self.inputs.contains(&node) || self.outputs.contains(&node)
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = MoveNodeId> + '_ {
        self.inputs.iter().chain(self.outputs.iter()).copied()
    }
}

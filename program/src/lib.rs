//! Program representation consumed by the ttac scheduler.
//!
//! A program reaches the scheduler as a [ControlFlowGraph] of
//! [BasicBlock]s, each an ordered list of [Move]s; the scheduler's working
//! representation wraps each move in a [MoveNode] and groups the moves of
//! one operation instance into a [ProgramOperation], both allocated from a
//! [ProgramStore] arena with stable ids.

mod block;
mod mov;
mod node;
mod po;
mod store;
mod stream;
mod terminal;

pub use self::{
    block::{BasicBlock, BlockId, BlockMove, CfgEdgeKind, ControlFlowGraph},
    mov::{GuardSrc, Move, MoveGuard},
    node::{MoveNode, MoveNodeId, NodeFlags},
    po::{PoId, ProgramOperation},
    store::ProgramStore,
    stream::{Instruction, InstructionStream, ScheduledMove},
    terminal::{RegRef, Terminal},
};

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ttac_machine::{OperationRegistry, RfId};

    use super::*;

    #[test]
    fn operation_helper_emits_operand_writes_then_result_reads() {
        let registry = OperationRegistry::with_base_operations();
        let add = registry.expect("add");
        let rf = RfId::from_u32(0);
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::reg(rf, 1), Terminal::reg(rf, 2)],
            &[Terminal::reg(rf, 3)],
        );

        assert_eq!(bb.len(), 3);
        let groups: Vec<_> = bb.moves().iter().map(|m| m.group).collect();
        assert_eq!(groups, vec![Some(0), Some(0), Some(0)]);
        assert_eq!(bb.moves()[0].mov.destination.operation_index(), Some(1));
        assert_eq!(bb.moves()[1].mov.destination.operation_index(), Some(2));
        assert_eq!(bb.moves()[2].mov.source.operation_index(), Some(3));
    }

    #[test]
    fn guard_exclusion_requires_same_source_opposite_polarity() {
        let r = RegRef {
            rf: RfId::from_u32(1),
            index: 0,
        };
        let g = MoveGuard::reg(r, false);
        let ng = MoveGuard::reg(r, true);
        assert!(g.excludes(&ng));
        assert!(!g.excludes(&g));
        let other = MoveGuard::reg(
            RegRef {
                rf: RfId::from_u32(1),
                index: 1,
            },
            true,
        );
        assert!(!g.excludes(&other));
    }
}

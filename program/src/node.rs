use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{mov::Move, po::PoId};

/// Stable identity of a move node; the comparison key for every ordered
/// container in the scheduler, which is what makes runs deterministic.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MoveNodeId(u32);
entity_impl!(MoveNodeId, "mn");

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Currently part of the scheduling front being worked on.
        const IN_FRONTIER = 1 << 0;
        /// Schedule decision is permanent; undo may no longer touch it.
        const FINALIZED = 1 << 1;
        /// Proven dead by dead-result elimination.
        const DEAD = 1 << 2;
        /// Operand shared to a dedicated port before the loop body.
        const PRE_LOOP_SHARED = 1 << 3;
        /// Logically removed from its graph, restorable.
        const DROPPED = 1 << 4;
    }
}

/// Scheduling-world wrapper around a [Move].
///
/// A node can simultaneously be an *input* of one program operation and the
/// *source* of another: bypassing rewires a consumer to read an FU output
/// directly, after which the consuming move belongs to both operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveNode {
    pub mov: Move,
    /// Assigned cycle; `None` while unscheduled.
    pub cycle: Option<i32>,
    /// The operation whose result this node reads, if any.
    pub source_op: Option<PoId>,
    /// Operations this node writes an operand of. More than one after
    /// operand sharing.
    pub dest_ops: SmallVec<[PoId; 1]>,
    pub flags: NodeFlags,
}

impl MoveNode {
    pub fn new(mov: Move) -> Self {
        Self {
            mov,
            cycle: None,
            source_op: None,
            dest_ops: SmallVec::new(),
            flags: NodeFlags::default(),
        }
    }

    #[inline]
    pub fn is_scheduled(&self) -> bool {
        self.cycle.is_some()
    }

    /// The assigned cycle. Panics when unscheduled; callers use this only
    /// behind an `is_scheduled` check.
    #[inline]
    pub fn cycle(&self) -> i32 {
        self.cycle.expect("node is not scheduled")
    }

    #[inline]
    pub fn is_source_operation(&self) -> bool {
        self.source_op.is_some()
    }

    #[inline]
    pub fn is_destination_operation(&self) -> bool {
        !self.dest_ops.is_empty()
    }

    pub fn destination_operation_count(&self) -> usize {
        self.dest_ops.len()
    }

    pub fn is_dead(&self) -> bool {
        self.flags.contains(NodeFlags::DEAD)
    }

    pub fn is_dropped(&self) -> bool {
        self.flags.contains(NodeFlags::DROPPED)
    }

    pub fn is_finalized(&self) -> bool {
        self.flags.contains(NodeFlags::FINALIZED)
    }

    pub fn is_in_frontier(&self) -> bool {
        self.flags.contains(NodeFlags::IN_FRONTIER)
    }

    pub fn is_pre_loop_shared(&self) -> bool {
        self.flags.contains(NodeFlags::PRE_LOOP_SHARED)
    }

    /// A register-to-register or immediate-to-register move not attached to
    /// any operation.
    pub fn is_plain_transport(&self) -> bool {
        self.source_op.is_none() && self.dest_ops.is_empty()
    }

    pub fn set_cycle(&mut self, cycle: i32) {
        debug_assert!(self.cycle.is_none(), "node already scheduled");
        self.cycle = Some(cycle);
    }

    pub fn unset_cycle(&mut self) {
        debug_assert!(self.cycle.is_some(), "node not scheduled");
        self.cycle = None;
    }
}

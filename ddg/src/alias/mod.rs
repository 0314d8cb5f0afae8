//! Memory alias analysis.
//!
//! Analyzers answer whether two memory operations may touch the same
//! location. They are consulted in registration order; the first one with a
//! definite answer wins. A `True` answer marks the installed edge as a
//! certain alias and is never downgraded by a later analyzer.

mod constant;
mod global_vs_stack;
mod offset;
mod stack;

pub use self::{
    constant::ConstantAliasAnalyzer, global_vs_stack::GlobalVsStackAliasAnalyzer,
    offset::OffsetAliasAnalyzer, stack::StackAliasAnalyzer,
};

use ttac_program::{MoveNodeId, PoId, RegRef, Terminal};

use crate::Ddg;

/// Answer of one analyzer for one pair of operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AliasingResult {
    /// Provably disjoint.
    False,
    /// Provably overlapping.
    True,
    /// This analyzer cannot tell.
    Unknown,
}

/// Whether the queried pair is within one iteration or crosses the loop
/// back edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EdgeSpan {
    Intra,
    LoopCarried,
}

/// Capability shared by all alias analyzers.
pub trait MemoryAliasAnalyzer {
    fn name(&self) -> &'static str;

    /// Whether the analyzer can say anything at all about the address of
    /// `po` — i.e. whether some query involving it could return a definite
    /// answer.
    fn is_address_traceable(&self, ddg: &Ddg<'_>, po: PoId) -> bool;

    fn analyze(&self, ddg: &Ddg<'_>, po1: PoId, po2: PoId, span: EdgeSpan) -> AliasingResult;
}

/// Result of walking an address back toward the stack pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StackTrace {
    /// Stack pointer plus a known constant.
    Offset(i64),
    /// Provably not derived from the stack pointer.
    NotStack,
    Unknown,
}

/// The input node writing the address operand of a memory operation.
pub fn address_operand_input(ddg: &Ddg<'_>, po: PoId) -> Option<MoveNodeId> {
    let desc = ddg.registry().get(ddg.store().po(po).op);
    let operand = desc.address_operand?;
    ddg.store().input_for_operand(po, operand)
}

/// Memory access size of an operation, in address units (bytes).
pub fn access_width(ddg: &Ddg<'_>, po: PoId) -> i64 {
    let desc = ddg.registry().get(ddg.store().po(po).op);
    let bits = if desc.reads_memory {
        (desc.inputs + 1..=desc.operand_count())
            .map(|i| desc.operand_width(i))
            .max()
            .unwrap_or(32)
    } else {
        (1..=desc.inputs)
            .filter(|i| Some(*i) != desc.address_operand)
            .map(|i| desc.operand_width(i))
            .max()
            .unwrap_or(32)
    };
    (bits as i64 / 8).max(1)
}

/// Compare two known addresses with their access widths.
pub fn compare_indices(a1: i64, w1: i64, a2: i64, w2: i64) -> AliasingResult {
    if a1 + w1 <= a2 || a2 + w2 <= a1 {
        AliasingResult::False
    } else {
        AliasingResult::True
    }
}

const TRACE_FUEL: u32 = 16;

/// Walk a value back through unique register RAW producers to an immediate,
/// if the value is a compile-time constant.
pub fn trace_immediate(ddg: &Ddg<'_>, node: MoveNodeId, mut fuel: u32) -> Option<i64> {
    let mut current = node;
    loop {
        if fuel == 0 {
            return None;
        }
        fuel -= 1;
        let n = ddg.store().node(current);
        match n.mov.source {
            Terminal::Immediate { value, .. } => return Some(value),
            Terminal::Register(_) => {
                // Follow the unique same-iteration producer of the value.
                current = ddg.only_register_raw_source(current, false, 0)?;
            }
            _ => return None,
        }
    }
}

/// Walk an address back toward the stack pointer register, summing constant
/// adjustments along the way.
pub fn trace_stack_offset(ddg: &Ddg<'_>, node: MoveNodeId, sp: RegRef, fuel: u32) -> StackTrace {
    trace_stack_inner(ddg, node, sp, fuel, 0)
}

fn trace_stack_inner(
    ddg: &Ddg<'_>,
    node: MoveNodeId,
    sp: RegRef,
    fuel: u32,
    offset: i64,
) -> StackTrace {
    if fuel == 0 {
        return StackTrace::Unknown;
    }
    let n = ddg.store().node(node);
    match n.mov.source {
        Terminal::Immediate { .. } => StackTrace::NotStack,
        Terminal::Register(r) => {
            if r == sp {
                // Reads the stack pointer itself; it is assumed not to be
                // redefined inside the region being analyzed.
                return StackTrace::Offset(offset);
            }
            match ddg.only_register_raw_source(node, false, 0) {
                Some(producer) => trace_stack_inner(ddg, producer, sp, fuel - 1, offset),
                None => StackTrace::Unknown,
            }
        }
        Terminal::FuPort { .. } => {
            // A computed value: look through add/sub with a constant operand.
            let Some(po) = n.source_op else {
                return StackTrace::Unknown;
            };
            let desc = ddg.registry().get(ddg.store().po(po).op);
            let adjust = match desc.name.as_str() {
                "add" => 1,
                "sub" => -1,
                _ => return StackTrace::Unknown,
            };
            let in1 = ddg.store().input_for_operand(po, 1);
            let in2 = ddg.store().input_for_operand(po, 2);
            let (Some(in1), Some(in2)) = (in1, in2) else {
                return StackTrace::Unknown;
            };
            // One input must be constant, the other continues the walk.
            // For sub only `base - imm` is a stack form.
            if let Some(k) = trace_immediate(ddg, in2, TRACE_FUEL) {
                return trace_stack_inner(ddg, in1, sp, fuel - 1, offset + adjust * k);
            }
            if adjust == 1 {
                if let Some(k) = trace_immediate(ddg, in1, TRACE_FUEL) {
                    return trace_stack_inner(ddg, in2, sp, fuel - 1, offset + k);
                }
            }
            StackTrace::Unknown
        }
        _ => StackTrace::Unknown,
    }
}

/// A `base +/- constant` address decomposition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TwoPartAddress {
    /// The node whose value is the base, at the end of the walk.
    pub base: MoveNodeId,
    pub offset: i64,
}

/// Decompose the address of `po` into `base +/- constant`, following unique
/// producers. An address read directly from a register decomposes with
/// offset 0 and the producing node as base.
pub fn find_two_part_address(ddg: &Ddg<'_>, po: PoId) -> Option<TwoPartAddress> {
    let addr = address_operand_input(ddg, po)?;
    two_part_inner(ddg, addr, TRACE_FUEL, 0)
}

fn two_part_inner(
    ddg: &Ddg<'_>,
    node: MoveNodeId,
    fuel: u32,
    offset: i64,
) -> Option<TwoPartAddress> {
    if fuel == 0 {
        return None;
    }
    let n = ddg.store().node(node);
    match n.mov.source {
        Terminal::Register(_) => match ddg.only_register_raw_source(node, false, 0) {
            Some(producer) => two_part_inner(ddg, producer, fuel - 1, offset),
            // The base is whatever reaches this register from outside.
            None => Some(TwoPartAddress { base: node, offset }),
        },
        Terminal::FuPort { .. } => {
            let po = n.source_op?;
            let desc = ddg.registry().get(ddg.store().po(po).op);
            let adjust = match desc.name.as_str() {
                "add" => 1,
                "sub" => -1,
                _ => return Some(TwoPartAddress { base: node, offset }),
            };
            let in1 = ddg.store().input_for_operand(po, 1)?;
            let in2 = ddg.store().input_for_operand(po, 2)?;
            if let Some(k) = trace_immediate(ddg, in2, TRACE_FUEL) {
                return two_part_inner(ddg, in1, fuel - 1, offset + adjust * k);
            }
            if adjust == 1 {
                if let Some(k) = trace_immediate(ddg, in1, TRACE_FUEL) {
                    return two_part_inner(ddg, in2, fuel - 1, offset + k);
                }
            }
            Some(TwoPartAddress { base: node, offset })
        }
        _ => None,
    }
}

/// The ultimate base of a two-part address chain, for same-base comparison:
/// the node at the end of the walk plus the register it reads, when any.
pub fn base_identity(ddg: &Ddg<'_>, addr: TwoPartAddress) -> (MoveNodeId, Option<RegRef>) {
    (
        addr.base,
        ddg.store().node(addr.base).mov.source.as_register(),
    )
}

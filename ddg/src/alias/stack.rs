use ttac_program::{PoId, RegRef};

use super::{
    access_width, address_operand_input, compare_indices, trace_stack_offset, AliasingResult,
    EdgeSpan, MemoryAliasAnalyzer, StackTrace,
};
use crate::Ddg;

/// Disambiguates stack accesses.
///
/// Walks addresses back through register RAW producers, summing constant
/// adjustments, until the stack pointer is reached. Two stack slots at
/// different offsets cannot alias. A walk that would have to cross the loop
/// back edge gives up: the pointer may be incremented between iterations.
#[derive(Debug)]
pub struct StackAliasAnalyzer {
    sp: RegRef,
}

impl StackAliasAnalyzer {
    pub fn new(sp: RegRef) -> Self {
        Self { sp }
    }

    fn trace(&self, ddg: &Ddg<'_>, po: PoId) -> StackTrace {
        match address_operand_input(ddg, po) {
            Some(input) => trace_stack_offset(ddg, input, self.sp, 16),
            None => StackTrace::Unknown,
        }
    }
}

impl MemoryAliasAnalyzer for StackAliasAnalyzer {
    fn name(&self) -> &'static str {
        "stack"
    }

    fn is_address_traceable(&self, ddg: &Ddg<'_>, po: PoId) -> bool {
        matches!(self.trace(ddg, po), StackTrace::Offset(_))
    }

    fn analyze(&self, ddg: &Ddg<'_>, po1: PoId, po2: PoId, span: EdgeSpan) -> AliasingResult {
        // The offsets are relative to the iteration's own stack pointer
        // value; across the back edge the comparison only holds if nothing
        // moves the pointer, which is not established here.
        if span == EdgeSpan::LoopCarried {
            return AliasingResult::Unknown;
        }
        match (self.trace(ddg, po1), self.trace(ddg, po2)) {
            (StackTrace::Offset(o1), StackTrace::Offset(o2)) => {
                compare_indices(o1, access_width(ddg, po1), o2, access_width(ddg, po2))
            }
            _ => AliasingResult::Unknown,
        }
    }
}

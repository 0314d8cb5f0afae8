use ttac_program::{PoId, RegRef};

use super::{
    address_operand_input, trace_immediate, trace_stack_offset, AliasingResult, EdgeSpan,
    MemoryAliasAnalyzer, StackTrace,
};
use crate::Ddg;

/// Proves non-aliasing between stack and global accesses.
///
/// An address that traces to the stack pointer lives in the stack segment;
/// an address that traces to an immediate is a global. The two segments are
/// disjoint by construction, so such a pair never aliases, in any
/// iteration.
#[derive(Debug)]
pub struct GlobalVsStackAliasAnalyzer {
    sp: RegRef,
}

impl GlobalVsStackAliasAnalyzer {
    pub fn new(sp: RegRef) -> Self {
        Self { sp }
    }

    fn classify(&self, ddg: &Ddg<'_>, po: PoId) -> StackTrace {
        let Some(input) = address_operand_input(ddg, po) else {
            return StackTrace::Unknown;
        };
        match trace_stack_offset(ddg, input, self.sp, 16) {
            StackTrace::Offset(o) => StackTrace::Offset(o),
            StackTrace::NotStack => {
                // Only a constant address counts as a proven global.
                if trace_immediate(ddg, input, 16).is_some() {
                    StackTrace::NotStack
                } else {
                    StackTrace::Unknown
                }
            }
            StackTrace::Unknown => StackTrace::Unknown,
        }
    }
}

impl MemoryAliasAnalyzer for GlobalVsStackAliasAnalyzer {
    fn name(&self) -> &'static str {
        "global-vs-stack"
    }

    fn is_address_traceable(&self, ddg: &Ddg<'_>, po: PoId) -> bool {
        !matches!(self.classify(ddg, po), StackTrace::Unknown)
    }

    fn analyze(&self, ddg: &Ddg<'_>, po1: PoId, po2: PoId, _span: EdgeSpan) -> AliasingResult {
        match (self.classify(ddg, po1), self.classify(ddg, po2)) {
            (StackTrace::Offset(_), StackTrace::NotStack)
            | (StackTrace::NotStack, StackTrace::Offset(_)) => AliasingResult::False,
            _ => AliasingResult::Unknown,
        }
    }
}

use ttac_program::PoId;

use super::{
    access_width, address_operand_input, compare_indices, trace_immediate, AliasingResult,
    EdgeSpan, MemoryAliasAnalyzer,
};
use crate::Ddg;

/// Disambiguates accesses whose addresses trace back to immediates.
///
/// Absolute addresses do not change between iterations, so the loop-carried
/// answer equals the intra-iteration one.
#[derive(Debug, Default)]
pub struct ConstantAliasAnalyzer;

impl ConstantAliasAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn address_of(&self, ddg: &Ddg<'_>, po: PoId) -> Option<i64> {
        let input = address_operand_input(ddg, po)?;
        trace_immediate(ddg, input, 16)
    }
}

impl MemoryAliasAnalyzer for ConstantAliasAnalyzer {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn is_address_traceable(&self, ddg: &Ddg<'_>, po: PoId) -> bool {
        self.address_of(ddg, po).is_some()
    }

    fn analyze(&self, ddg: &Ddg<'_>, po1: PoId, po2: PoId, _span: EdgeSpan) -> AliasingResult {
        match (self.address_of(ddg, po1), self.address_of(ddg, po2)) {
            (Some(a1), Some(a2)) => {
                compare_indices(a1, access_width(ddg, po1), a2, access_width(ddg, po2))
            }
            _ => AliasingResult::Unknown,
        }
    }
}

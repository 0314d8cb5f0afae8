use ttac_program::PoId;

use super::{
    access_width, base_identity, compare_indices, find_two_part_address, AliasingResult, EdgeSpan,
    MemoryAliasAnalyzer,
};
use crate::Ddg;

/// Disambiguates `base + constant` / `base - constant` address forms.
///
/// When two accesses share the same base value definition, only their
/// offsets decide aliasing, whatever the base happens to be at run time.
#[derive(Debug, Default)]
pub struct OffsetAliasAnalyzer;

impl OffsetAliasAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl MemoryAliasAnalyzer for OffsetAliasAnalyzer {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn is_address_traceable(&self, ddg: &Ddg<'_>, po: PoId) -> bool {
        find_two_part_address(ddg, po).is_some()
    }

    fn analyze(&self, ddg: &Ddg<'_>, po1: PoId, po2: PoId, span: EdgeSpan) -> AliasingResult {
        // The shared-base argument only holds within one iteration; the
        // base may be advanced between them.
        if span == EdgeSpan::LoopCarried {
            return AliasingResult::Unknown;
        }
        let (Some(a1), Some(a2)) = (
            find_two_part_address(ddg, po1),
            find_two_part_address(ddg, po2),
        ) else {
            return AliasingResult::Unknown;
        };
        let (b1, r1) = base_identity(ddg, a1);
        let (b2, r2) = base_identity(ddg, a2);
        // Same base definition: either literally the same node, or reads of
        // the same externally-defined register.
        let same_base = b1 == b2 || (r1.is_some() && r1 == r2);
        if !same_base {
            return AliasingResult::Unknown;
        }
        compare_indices(
            a1.offset,
            access_width(ddg, po1),
            a2.offset,
            access_width(ddg, po2),
        )
    }
}

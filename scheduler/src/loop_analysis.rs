//! Trip count extraction from a loop body's dependence graph.
//!
//! Walks back from the loop-exit jump through its guard definition to the
//! bounding comparison, then classifies the counter update. When both the
//! bound and the stride are immediates the iteration count is static.

use ttac_ddg::Ddg;
use ttac_program::{MoveNodeId, RegRef, Terminal};

/// What bounds a counted loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBound {
    /// The counter register.
    pub counter: RegRef,
    /// Constant added to the counter every iteration.
    pub stride: i64,
    /// The comparison bound.
    pub limit: i64,
}

impl LoopBound {
    /// Iterations remaining from a known starting value.
    pub fn trip_count_from(&self, init: i64) -> Option<u32> {
        if self.stride == 0 {
            return None;
        }
        let distance = self.limit - init;
        if distance % self.stride != 0 || distance / self.stride < 0 {
            return None;
        }
        u32::try_from(distance / self.stride).ok()
    }
}

/// Find the loop bound of a single-block loop, given its graph and the
/// guarded jump node.
pub fn find_loop_limit(ddg: &Ddg<'_>, jump: MoveNodeId) -> Option<LoopBound> {
    let registry = ddg.registry();
    // The jump guard comes from one comparison.
    let guard_def = ddg.only_guard_def(jump)?;
    let cmp_po = ddg.store().node(guard_def).source_op?;
    let cmp = ddg.store().po(cmp_po);
    let cmp_desc = registry.get(cmp.op);
    if !matches!(cmp_desc.name.as_str(), "eq" | "ne" | "gt" | "gtu" | "lt" | "ltu") {
        return None;
    }

    // One comparison input is the counter, the other the limit.
    let in1 = ddg.store().input_for_operand(cmp_po, 1)?;
    let in2 = ddg.store().input_for_operand(cmp_po, 2)?;
    let (counter_node, limit) = match (
        ddg.store().node(in1).mov.source,
        ddg.store().node(in2).mov.source,
    ) {
        (Terminal::Register(_), src2) => (in1, src2.immediate_value()?),
        (src1, Terminal::Register(_)) => (in2, src1.immediate_value()?),
        _ => return None,
    };
    let counter = ddg.store().node(counter_node).mov.source.as_register()?;

    // The counter must be updated by exactly one add/sub with an immediate
    // stride inside the loop.
    let update = ddg.only_register_raw_source(counter_node, false, 1)?;
    let update_po = ddg.store().node(update).mov.source.operation_index().and_then(|_| {
        ddg.store().node(update).source_op
    })?;
    let update_desc = registry.get(ddg.store().po(update_po).op);
    let sign = match update_desc.name.as_str() {
        "add" => 1,
        "sub" => -1,
        _ => return None,
    };
    let u2 = ddg.store().input_for_operand(update_po, 2)?;
    let stride = ddg.store().node(u2).mov.source.immediate_value()? * sign;

    Some(LoopBound {
        counter,
        stride,
        limit,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ttac_ddg::DdgBuilder;
    use ttac_machine::{testing, OperationRegistry};
    use ttac_program::{BasicBlock, GuardSrc, MoveGuard, Terminal};
    use ttac_session::SchedulerOptions;

    use super::*;

    #[test]
    fn counted_loop_bound_is_recovered() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let add = registry.expect("add");
        let ne = registry.expect("ne");
        let jump = registry.expect("jump");
        let bool_reg = RegRef {
            rf: m.bool_rf,
            index: 0,
        };

        // r0 = add(r0, 4); b0 = ne(r0, 40); if b0 jump top
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::reg(m.rf, 0), Terminal::imm(4)],
            &[Terminal::reg(m.rf, 0)],
        );
        bb.operation(
            &registry,
            ne,
            &[Terminal::reg(m.rf, 0), Terminal::imm(40)],
            &[Terminal::Register(bool_reg)],
        );
        bb.operation_guarded(
            &registry,
            jump,
            &[Terminal::imm(0)],
            &[],
            Some(MoveGuard {
                source: GuardSrc::Register(bool_reg),
                inverted: false,
            }),
        );
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let ddg = builder
            .build_loop("count", &bb, &[RegRef { rf: m.rf, index: 0 }])
            .unwrap();
        let jump_node = ddg
            .nodes()
            .find(|n| ddg.store().node(*n).mov.is_control_flow(&registry))
            .unwrap();

        let bound = find_loop_limit(&ddg, jump_node).unwrap();
        assert_eq!(bound.counter, RegRef { rf: m.rf, index: 0 });
        assert_eq!(bound.stride, 4);
        assert_eq!(bound.limit, 40);
        assert_eq!(bound.trip_count_from(0), Some(10));
        assert_eq!(bound.trip_count_from(41), None);
    }
}

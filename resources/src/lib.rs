//! Transport resource management.
//!
//! The [ResourceManager] owns the per-cycle occupancy tables of one
//! scheduling region: which bus each cycle's moves ride, which function
//! unit pipelines are triggered, which register file ports and immediate
//! template slots are consumed. `assign` on a cycle `can_assign` approved
//! always succeeds, and `unassign` restores the tables to exactly their
//! prior content, so assign/unassign sequences compose with the
//! scheduler's reversible transformations.

mod constraints;
mod manager;

pub use self::{
    constraints::ResourceConstraintAnalyzer,
    manager::{AssignOpts, Assignment, ResourceManager},
};

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ttac_ddg::DdgBuilder;
    use ttac_machine::{testing, OperationRegistry};
    use ttac_program::{BasicBlock, MoveNodeId, Terminal};
    use ttac_session::SchedulerOptions;

    use super::*;

    fn add_block(registry: &OperationRegistry, m: &testing::MinimalMachine) -> BasicBlock {
        let add = registry.expect("add");
        let mut bb = BasicBlock::new();
        bb.operation(
            registry,
            add,
            &[Terminal::reg(m.rf, 1), Terminal::reg(m.rf, 2)],
            &[Terminal::reg(m.rf, 3)],
        );
        bb
    }

    #[test]
    fn bus_exclusion_within_one_cycle() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let bb = add_block(&registry, &m);
        let mut ddg = builder.build("t", &bb, &[]).unwrap();
        let mut rm = ResourceManager::new(&m.machine, &registry);

        let op1 = MoveNodeId::from_u32(0);
        let op2 = MoveNodeId::from_u32(1);
        // Two operand writes in the same cycle must land on different buses.
        rm.assign(0, &mut ddg, op1, AssignOpts::default()).unwrap();
        rm.assign(0, &mut ddg, op2, AssignOpts::default()).unwrap();
        let a1 = rm.assignment(op1).unwrap();
        let a2 = rm.assignment(op2).unwrap();
        assert_ne!(a1.bus, a2.bus);

        // A third move in the same cycle fails: only two buses exist.
        let result = MoveNodeId::from_u32(2);
        assert!(!rm.can_assign(0, &ddg, result, AssignOpts::default()));
        assert!(rm.can_assign(1, &ddg, result, AssignOpts::default()));
    }

    #[test]
    fn unassign_restores_prior_state() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let bb = add_block(&registry, &m);
        let mut ddg = builder.build("t", &bb, &[]).unwrap();
        let mut rm = ResourceManager::new(&m.machine, &registry);

        let node = MoveNodeId::from_u32(0);
        rm.assign(0, &mut ddg, node, AssignOpts::default()).unwrap();
        assert!(ddg.store().node(node).is_scheduled());
        rm.unassign(&mut ddg, node).unwrap();
        assert!(!ddg.store().node(node).is_scheduled());
        assert_eq!(rm.assigned_node_count(), 0);
        assert_eq!(rm.smallest_cycle(), None);

        // Unassigning again is a programming error.
        assert!(rm.unassign(&mut ddg, node).is_err());
    }

    #[test]
    fn trigger_fixes_the_function_unit_for_the_operation() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let bb = add_block(&registry, &m);
        let mut ddg = builder.build("t", &bb, &[]).unwrap();
        let mut rm = ResourceManager::new(&m.machine, &registry);

        let trigger = MoveNodeId::from_u32(1);
        rm.assign(0, &mut ddg, trigger, AssignOpts::default()).unwrap();
        let po = ttac_program::PoId::from_u32(0);
        assert_eq!(ddg.store().po(po).fu, Some(m.alu));
        rm.unassign(&mut ddg, trigger).unwrap();
        assert_eq!(ddg.store().po(po).fu, None);
    }

    #[test]
    fn modulo_occupancy_wraps_at_ii() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let mut bb = add_block(&registry, &m);
        let add = registry.expect("add");
        bb.operation(
            &registry,
            add,
            &[Terminal::reg(m.rf, 4), Terminal::reg(m.rf, 5)],
            &[Terminal::reg(m.rf, 6)],
        );
        let mut ddg = builder.build("t", &bb, &[]).unwrap();
        let mut rm = ResourceManager::new(&m.machine, &registry).with_initiation_interval(2);

        // Trigger of the first add at cycle 0 occupies the ALU trigger slot
        // 0 mod 2; the second add's trigger then cannot go to cycle 2.
        let t1 = MoveNodeId::from_u32(1);
        let t2 = MoveNodeId::from_u32(4);
        rm.assign(0, &mut ddg, t1, AssignOpts::default()).unwrap();
        assert!(!rm.can_assign(2, &ddg, t2, AssignOpts::default()));
        assert!(rm.can_assign(3, &ddg, t2, AssignOpts::default()));
    }

    #[test]
    fn long_immediate_uses_template_and_unit() {
        let registry = OperationRegistry::with_base_operations();
        let mut b = ttac_machine::MachineBuilder::new("limm");
        let b0 = b.bus("b0", 32, 8);
        let b1 = b.bus("b1", 32, 8);
        let rf = b.register_file("RF", 32, 16, 2, 2, 1);
        let iu = b.immediate_unit("IU", 32, 2);
        b.instruction_template("limm", &[(b0, 16, iu), (b1, 16, iu)]);
        b.fully_connect();
        let machine = b.finish();

        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&machine, &registry, &options);
        let mut bb = BasicBlock::new();
        bb.transport(Terminal::imm(0x12345678), Terminal::reg(rf, 1));
        let mut ddg = builder.build("t", &bb, &[]).unwrap();
        let mut rm = ResourceManager::new(&machine, &registry);

        let node = MoveNodeId::from_u32(0);
        // Cycle 0 leaves no room for the staging write one cycle earlier.
        assert!(!rm.can_assign(0, &ddg, node, AssignOpts::default()));
        rm.assign(1, &mut ddg, node, AssignOpts::default()).unwrap();
        assert_eq!(rm.immediate_write_cycle(node), Some(0));
        let stream = rm.instructions(&ddg);
        assert_eq!(stream.instructions.len(), 2);
        assert_eq!(stream.instructions[0].immediates.len(), 1);
    }
}

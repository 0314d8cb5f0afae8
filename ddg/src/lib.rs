//! Data dependence graph for the ttac scheduler.
//!
//! The [Ddg] is a directed multigraph over move nodes with typed, attributed
//! edges (register, memory, FU-state, operation, return-address), loop
//! back edges carrying an iteration distance, and cached longest-path
//! queries. The [DdgBuilder] derives the graph from basic blocks, consulting
//! pluggable [alias] analyzers for memory edges; the graph then supports the
//! reversible mutations the scheduler needs: drop/restore of nodes, bypass
//! merge/unmerge, and dependence bridging.

pub mod alias;
mod builder;
mod dump;
mod edge;
mod graph;
mod liverange;

pub use self::{
    builder::DdgBuilder,
    edge::{DataDependenceEdge, DepType, EdgeData, EdgeFlags, EdgeId, EdgeKind, EdgeRecord},
    graph::{
        CopiedDeps, Ddg, DdgView, DroppedNode, EdgeIgnore, EdgeWeightHeuristics, MergeUndo,
    },
    liverange::LiveRangeData,
};

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ttac_machine::{testing, OperationRegistry};
    use ttac_program::{BasicBlock, RegRef, Terminal};
    use ttac_session::SchedulerOptions;

    use super::*;

    fn reg(m: &testing::MinimalMachine, index: u16) -> RegRef {
        RegRef { rf: m.rf, index }
    }

    /// `r3 = add(r1, r2); r5 = sub(r3, r4)`
    fn add_sub_block(registry: &OperationRegistry, m: &testing::MinimalMachine) -> BasicBlock {
        let add = registry.expect("add");
        let sub = registry.expect("sub");
        let mut bb = BasicBlock::new();
        bb.operation(
            registry,
            add,
            &[Terminal::reg(m.rf, 1), Terminal::reg(m.rf, 2)],
            &[Terminal::reg(m.rf, 3)],
        );
        bb.operation(
            registry,
            sub,
            &[Terminal::reg(m.rf, 3), Terminal::reg(m.rf, 4)],
            &[Terminal::reg(m.rf, 5)],
        );
        bb
    }

    #[test]
    fn builder_wires_operation_and_register_edges() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let bb = add_sub_block(&registry, &m);
        let ddg = builder.build("t", &bb, &[]).unwrap();

        assert_eq!(ddg.node_count(), 6);
        assert_eq!(ddg.store().po_count(), 2);

        // The add result (node 2) feeds the sub operand write (node 3) over
        // a register RAW edge on r3.
        let result = ttac_program::MoveNodeId::from_u32(2);
        let user = ttac_program::MoveNodeId::from_u32(3);
        let raw = ddg
            .out_edges(result)
            .find(|(_, rec)| rec.head == user && rec.edge.dep == DepType::Raw);
        assert!(raw.is_some());
        assert_eq!(
            ddg.edge(raw.unwrap().0).edge.data_register(),
            Some(reg(&m, 3))
        );
        ddg.sanity_check().unwrap();
    }

    #[test]
    fn earliest_cycle_honors_latency() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let bb = add_sub_block(&registry, &m);
        let mut ddg = builder.build("t", &bb, &[]).unwrap();

        // Schedule the add trigger at cycle 5: its result read may happen
        // no earlier than 5 + latency(add) = 6.
        let trigger = ttac_program::MoveNodeId::from_u32(1);
        let result = ttac_program::MoveNodeId::from_u32(2);
        ddg.schedule_node(trigger, 5);
        assert_eq!(
            ddg.earliest_cycle(result, 0, EdgeIgnore::default()),
            Some(6)
        );
        // And latest cycle of the trigger is bounded from the result side
        // once it is scheduled.
        ddg.schedule_node(result, 8);
        ddg.unschedule_node(trigger);
        assert_eq!(
            ddg.latest_cycle(trigger, 0, EdgeIgnore::default()),
            Some(7)
        );
    }

    #[test]
    fn merge_and_unmerge_restore_canonical_dump() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let bb = add_sub_block(&registry, &m);
        let mut ddg = builder.build("t", &bb, &[]).unwrap();

        let before = ddg.xml_string();
        let result = ttac_program::MoveNodeId::from_u32(2);
        let user = ttac_program::MoveNodeId::from_u32(3);
        assert!(ddg.merge_and_keep_allowed(result, user));
        let undo = ddg.merge_and_keep(result, user).unwrap();
        // After the bypass the user reads the FU port, so an operation edge
        // with the add latency now bounds it.
        assert_ne!(ddg.xml_string(), before);
        ddg.unmerge(undo);
        assert_eq!(ddg.xml_string(), before);
        ddg.sanity_check().unwrap();
    }

    #[test]
    fn drop_and_restore_is_exact() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let bb = add_sub_block(&registry, &m);
        let mut ddg = builder.build("t", &bb, &[]).unwrap();

        let before = ddg.xml_string();
        let victim = ttac_program::MoveNodeId::from_u32(2);
        let undo = ddg.drop_node(victim);
        assert!(ddg.store().node(victim).is_dropped());
        assert!(!ddg.nodes().any(|n| n == victim));
        ddg.restore_node(undo);
        assert_eq!(ddg.xml_string(), before);
    }

    #[test]
    fn result_used_consults_live_out() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);

        let bb = add_sub_block(&registry, &m);
        let ddg = builder.build("no-liveout", &bb, &[]).unwrap();
        // r5 has no reader and is not live out: dead.
        let sub_result = ttac_program::MoveNodeId::from_u32(5);
        assert!(!ddg.result_used(sub_result));
        // r3 is read by the sub operands.
        let add_result = ttac_program::MoveNodeId::from_u32(2);
        assert!(ddg.result_used(add_result));

        let bb = add_sub_block(&registry, &m);
        let ddg = builder.build("liveout", &bb, &[reg(&m, 5)]).unwrap();
        let sub_result = ttac_program::MoveNodeId::from_u32(5);
        assert!(ddg.result_used(sub_result));
    }

    #[test]
    fn constant_alias_analyzer_separates_disjoint_accesses() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);

        let ldw = registry.expect("ldw");
        let stw = registry.expect("stw");
        let mut bb = BasicBlock::new();
        // Store to address 0x100, load from 0x200: provably disjoint, no
        // memory edge.
        bb.operation(
            &registry,
            stw,
            &[Terminal::imm(0x100), Terminal::reg(m.rf, 1)],
            &[],
        );
        bb.operation(&registry, ldw, &[Terminal::imm(0x200)], &[Terminal::reg(m.rf, 2)]);
        let ddg = builder.build("disjoint", &bb, &[]).unwrap();
        assert_eq!(ddg.memory_dependence_graph().edges.len(), 0);

        // Same addresses: a certain-alias RAW edge appears.
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            stw,
            &[Terminal::imm(0x100), Terminal::reg(m.rf, 1)],
            &[],
        );
        bb.operation(&registry, ldw, &[Terminal::imm(0x100)], &[Terminal::reg(m.rf, 2)]);
        let ddg = builder.build("alias", &bb, &[]).unwrap();
        let mem = ddg.memory_dependence_graph();
        assert_eq!(mem.edges.len(), 1);
        let rec = ddg.edge(mem.edges[0]);
        assert_eq!(rec.edge.dep, DepType::Raw);
        assert!(rec.edge.is_certain_alias());
    }

    #[test]
    fn loop_build_closes_carried_dependences() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let builder = DdgBuilder::new(&m.machine, &registry, &options);

        // r1 = add(r1, 1): reads then writes r1 every iteration.
        let add = registry.expect("add");
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::reg(m.rf, 1), Terminal::imm(1)],
            &[Terminal::reg(m.rf, 1)],
        );
        let ddg = builder.build_loop("loop", &bb, &[reg(&m, 1)]).unwrap();

        let back_edges: Vec<_> = ddg
            .edge_records()
            .filter(|(_, rec)| rec.edge.is_back_edge())
            .collect();
        // The write of r1 feeds next iteration's read: a RAW back edge, plus
        // the loop antidependences.
        assert!(back_edges
            .iter()
            .any(|(_, rec)| rec.edge.dep == DepType::Raw && rec.edge.kind == EdgeKind::Register));
        // With ii = 2 the carried RAW allows the read one iteration later.
        let write = ttac_program::MoveNodeId::from_u32(2);
        let read = ttac_program::MoveNodeId::from_u32(0);
        let mut ddg = ddg;
        ddg.schedule_node(write, 3);
        let e = ddg.earliest_cycle(read, 2, EdgeIgnore::default());
        // 3 + 1 - 1*2 = 2
        assert_eq!(e, Some(2));
    }
}

#[cfg(test)]
mod prop_tests {
    use proptest::prelude::*;
    use ttac_machine::{testing, OperationRegistry};
    use ttac_program::{BasicBlock, MoveNodeId, Terminal};
    use ttac_session::SchedulerOptions;

    use super::*;

    fn arbitrary_block() -> impl Strategy<Value = Vec<(u8, u16, u16, u16)>> {
        proptest::collection::vec((0u8..4, 0u16..8, 0u16..8, 0u16..8), 1..8)
    }

    fn build(ops: &[(u8, u16, u16, u16)]) -> BasicBlock {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let names = ["add", "sub", "mul", "xor"];
        let mut bb = BasicBlock::new();
        for (op, a, b, d) in ops {
            let op = registry.expect(names[*op as usize]);
            bb.operation(
                &registry,
                op,
                &[Terminal::reg(m.rf, *a), Terminal::reg(m.rf, *b)],
                &[Terminal::reg(m.rf, *d)],
            );
        }
        bb
    }

    proptest! {
        /// Graph construction is a pure function of the block.
        #[test]
        fn builder_is_deterministic(ops in arbitrary_block()) {
            let registry = OperationRegistry::with_base_operations();
            let m = testing::minimal_machine(&registry);
            let options = SchedulerOptions::default();
            let builder = DdgBuilder::new(&m.machine, &registry, &options);
            let bb = build(&ops);
            let a = builder.build("p", &bb, &[]).unwrap().xml_string();
            let b = builder.build("p", &bb, &[]).unwrap().xml_string();
            prop_assert_eq!(a, b);
        }

        /// Dropping any node and restoring it reproduces the graph exactly.
        #[test]
        fn drop_restore_roundtrips(ops in arbitrary_block(), pick in 0usize..32) {
            let registry = OperationRegistry::with_base_operations();
            let m = testing::minimal_machine(&registry);
            let options = SchedulerOptions::default();
            let builder = DdgBuilder::new(&m.machine, &registry, &options);
            let bb = build(&ops);
            let mut ddg = builder.build("p", &bb, &[]).unwrap();
            let victim = MoveNodeId::from_u32((pick % ddg.node_count()) as u32);
            let before = ddg.xml_string();
            let undo = ddg.drop_node(victim);
            let restored = {
                ddg.restore_node(undo);
                ddg.xml_string()
            };
            prop_assert_eq!(before, restored);
        }
    }
}

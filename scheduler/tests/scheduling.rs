//! End-to-end scheduling scenarios over small in-code machines.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use ttac_ddg::DdgBuilder;
use ttac_machine::{testing, OperationRegistry};
use ttac_program::{BasicBlock, GuardSrc, InstructionStream, MoveGuard, RegRef, Terminal};
use ttac_resources::ResourceManager;
use ttac_scheduler::Bf2Scheduler;
use ttac_session::{ScheduleError, SchedulerOptions};

fn reg(m: &testing::MinimalMachine, index: u16) -> RegRef {
    RegRef { rf: m.rf, index }
}

/// No two moves of any instruction share a bus; within the kernel the
/// check applies modulo the initiation interval.
fn assert_resource_exclusion(stream: &InstructionStream, ii: u32) {
    let mut used: BTreeMap<(i32, u32), u32> = BTreeMap::new();
    for instr in &stream.instructions {
        let key_cycle = if ii > 0 {
            instr.cycle.rem_euclid(ii as i32)
        } else {
            instr.cycle
        };
        for mv in &instr.moves {
            let slot = used.entry((key_cycle, mv.bus.as_u32())).or_insert(0);
            *slot += 1;
            assert_eq!(*slot, 1, "two moves share bus {} at cycle {key_cycle}", mv.bus);
        }
    }
}

#[test]
fn single_alu_add() {
    let registry = OperationRegistry::with_base_operations();
    let m = testing::minimal_machine(&registry);
    let options = SchedulerOptions::default();
    let add = registry.expect("add");

    let mut bb = BasicBlock::new();
    bb.operation(
        &registry,
        add,
        &[Terminal::reg(m.rf, 1), Terminal::reg(m.rf, 2)],
        &[Terminal::reg(m.rf, 3)],
    );
    let builder = DdgBuilder::new(&m.machine, &registry, &options);
    let ddg = builder.build("add", &bb, &[reg(&m, 3)]).unwrap();
    let rm = ResourceManager::new(&m.machine, &registry);

    let result = Bf2Scheduler::new(ddg, rm, &options).schedule_ddg().unwrap();
    assert_eq!(result.stream.move_count(), 3);
    assert_resource_exclusion(&result.stream, 0);
    result.ddg.sanity_check().unwrap();

    // The two operand writes land in one cycle on different buses; the
    // result read follows the trigger by the operation latency.
    let store = result.ddg.store();
    let c0 = store.node(ttac_program::MoveNodeId::from_u32(0)).cycle();
    let c1 = store.node(ttac_program::MoveNodeId::from_u32(1)).cycle();
    let c2 = store.node(ttac_program::MoveNodeId::from_u32(2)).cycle();
    assert!(c0 <= c1, "operand write after the trigger");
    assert_eq!(c2, c1 + 1, "result read must trail the trigger by the latency");
    if c0 == c1 {
        let a0 = result.rm.assignment(ttac_program::MoveNodeId::from_u32(0)).unwrap();
        let a1 = result.rm.assignment(ttac_program::MoveNodeId::from_u32(1)).unwrap();
        assert_ne!(a0.bus, a1.bus);
    }
}

#[test]
fn commutative_swap_moves_immediate_to_trigger() {
    let registry = OperationRegistry::with_base_operations();
    let m = testing::minimal_machine(&registry);
    let options = SchedulerOptions::default();
    let mul = registry.expect("mul");

    // mul(#5, r2): the immediate sits on the non-trigger operand.
    let mut bb = BasicBlock::new();
    bb.operation(
        &registry,
        mul,
        &[Terminal::imm(5), Terminal::reg(m.rf, 2)],
        &[Terminal::reg(m.rf, 3)],
    );
    let builder = DdgBuilder::new(&m.machine, &registry, &options);
    let ddg = builder.build("mul", &bb, &[reg(&m, 3)]).unwrap();
    let rm = ResourceManager::new(&m.machine, &registry);

    let result = Bf2Scheduler::new(ddg, rm, &options).schedule_ddg().unwrap();
    // Operand 2 is the ALU trigger; after the swap its write carries the
    // immediate and the register read moved to operand 1.
    let store = result.ddg.store();
    let trigger = store.node(ttac_program::MoveNodeId::from_u32(1));
    assert_eq!(trigger.mov.destination.operation_index(), Some(2));
    assert!(trigger.mov.source.is_immediate(), "swap did not run");
    let other = store.node(ttac_program::MoveNodeId::from_u32(0));
    assert!(other.mov.source.is_register());
    assert_eq!(result.stream.move_count(), 3);
}

#[test]
fn bypass_elides_the_intermediate_register() {
    let registry = OperationRegistry::with_base_operations();
    let m = testing::minimal_machine(&registry);
    let options = SchedulerOptions::default();
    let add = registry.expect("add");
    let sub = registry.expect("sub");

    // r3 = add(r1, r2); r5 = sub(r3, r4) with r3 dead after the block.
    let mut bb = BasicBlock::new();
    bb.operation(
        &registry,
        add,
        &[Terminal::reg(m.rf, 1), Terminal::reg(m.rf, 2)],
        &[Terminal::reg(m.rf, 3)],
    );
    bb.operation(
        &registry,
        sub,
        &[Terminal::reg(m.rf, 3), Terminal::reg(m.rf, 4)],
        &[Terminal::reg(m.rf, 5)],
    );
    let builder = DdgBuilder::new(&m.machine, &registry, &options);
    let ddg = builder.build("bypass", &bb, &[reg(&m, 5)]).unwrap();
    let rm = ResourceManager::new(&m.machine, &registry);

    let result = Bf2Scheduler::new(ddg, rm, &options).schedule_ddg().unwrap();
    // The sub reads the ALU output directly and the r3 write is gone: one
    // move fewer than the unbypassed rendition.
    assert_eq!(result.stream.move_count(), 5);
    for instr in &result.stream.instructions {
        for mv in &instr.moves {
            assert_ne!(
                mv.mov.destination.as_register(),
                Some(reg(&m, 3)),
                "intermediate write survived the bypass"
            );
        }
    }
    assert_resource_exclusion(&result.stream, 0);
    result.ddg.sanity_check().unwrap();
}

#[test]
fn scheduling_is_deterministic() {
    let registry = OperationRegistry::with_base_operations();
    let m = testing::minimal_machine(&registry);
    let options = SchedulerOptions::default();
    let add = registry.expect("add");
    let mul = registry.expect("mul");

    let build = || {
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::reg(m.rf, 1), Terminal::reg(m.rf, 2)],
            &[Terminal::reg(m.rf, 3)],
        );
        bb.operation(
            &registry,
            mul,
            &[Terminal::reg(m.rf, 3), Terminal::reg(m.rf, 4)],
            &[Terminal::reg(m.rf, 6)],
        );
        bb.operation(
            &registry,
            add,
            &[Terminal::reg(m.rf, 6), Terminal::imm(1)],
            &[Terminal::reg(m.rf, 7)],
        );
        bb
    };
    let snapshot = |stream: &InstructionStream| {
        stream
            .instructions
            .iter()
            .flat_map(|i| {
                i.moves
                    .iter()
                    .map(move |m| (i.cycle, m.bus.as_u32(), m.node.as_u32()))
            })
            .collect::<Vec<_>>()
    };

    let builder = DdgBuilder::new(&m.machine, &registry, &options);
    let run = || {
        let ddg = builder.build("det", &build(), &[reg(&m, 7)]).unwrap();
        let rm = ResourceManager::new(&m.machine, &registry);
        Bf2Scheduler::new(ddg, rm, &options).schedule_ddg().unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(snapshot(&a.stream), snapshot(&b.stream));
}

#[test]
fn loop_with_overlap_pipelines_under_the_trip_count() {
    let registry = OperationRegistry::with_base_operations();
    let m = testing::minimal_machine(&registry);
    let options = SchedulerOptions::default();
    let ldw = registry.expect("ldw");
    let stw = registry.expect("stw");
    let add = registry.expect("add");
    let ne = registry.expect("ne");
    let jump = registry.expect("jump");

    // r1 = ldw(r0); r2 = add(r1, 1); stw(r0, r2); r0 = add(r0, 4);
    // b0 = ne(r0, 40); if b0 jump top
    let bool_reg = RegRef {
        rf: m.bool_rf,
        index: 0,
    };
    let mut bb = BasicBlock::new();
    bb.operation(&registry, ldw, &[Terminal::reg(m.rf, 0)], &[Terminal::reg(m.rf, 1)]);
    bb.operation(
        &registry,
        add,
        &[Terminal::reg(m.rf, 1), Terminal::imm(1)],
        &[Terminal::reg(m.rf, 2)],
    );
    bb.operation(
        &registry,
        stw,
        &[Terminal::reg(m.rf, 0), Terminal::reg(m.rf, 2)],
        &[],
    );
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
        .build_loop("loop", &bb, &[reg(&m, 0), reg(&m, 2)])
        .unwrap();
    let rm = ResourceManager::new(&m.machine, &registry);

    let trip_count = 10;
    let result = Bf2Scheduler::new(ddg, rm, &options)
        .schedule_loop_ddg(trip_count)
        .unwrap();
    assert!(result.ii >= 1);
    assert!(
        result.overlap_count < trip_count,
        "overlap {} must stay under the trip count",
        result.overlap_count
    );
    assert_resource_exclusion(&result.stream, result.ii);

    // Loop-carried dependences hold modulo the interval.
    let ii = result.ii;
    for (_, rec) in result.ddg.edge_records() {
        let tail = result.ddg.store().node(rec.tail);
        let head = result.ddg.store().node(rec.head);
        if let (Some(tc), Some(hc)) = (tail.cycle, head.cycle) {
            let latency = result.ddg.edge_latency(rec, ii);
            assert!(
                tc + latency <= hc,
                "dependence {} -> {} violated under ii {ii}",
                rec.tail,
                rec.head
            );
        }
    }
}

#[test]
fn missing_operation_is_reported_before_scheduling() {
    let registry = OperationRegistry::with_base_operations();
    let m = testing::single_alu_machine(&registry, &["sub"]);
    let options = SchedulerOptions::default();
    let add = registry.expect("add");

    let mut bb = BasicBlock::new();
    bb.operation(
        &registry,
        add,
        &[Terminal::reg(m.rf, 1), Terminal::reg(m.rf, 2)],
        &[Terminal::reg(m.rf, 3)],
    );
    // The graph itself builds fine; only scheduling needs the unit.
    let builder = DdgBuilder::new(&m.machine, &registry, &options);
    let ddg = builder.build("missing", &bb, &[reg(&m, 3)]).unwrap();
    assert_eq!(ddg.node_count(), 3);

    let rm = ResourceManager::new(&m.machine, &registry);
    let err = Bf2Scheduler::new(ddg, rm, &options).schedule_ddg().unwrap_err();
    assert!(
        matches!(err, ScheduleError::InvalidMachine { ref operation, .. } if operation == "add"),
        "unexpected error: {err:?}"
    );
}

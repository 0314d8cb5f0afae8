//! Canned machines for unit and integration tests.
//!
//! These are built in code rather than parsed from architecture definition
//! files; the shapes mirror the small cores the scheduler test suites are
//! written against.

use crate::{FuId, Machine, MachineBuilder, OperationRegistry, RfId};

/// Handles into [minimal_machine] parts that tests refer to by role.
pub struct MinimalMachine {
    pub machine: Machine,
    pub rf: RfId,
    pub bool_rf: RfId,
    pub alu: FuId,
    pub lsu: Option<FuId>,
    pub gcu: FuId,
}

/// A two-bus machine with one ALU, one load-store unit, a general-purpose
/// register file, a guard register file and a control unit.
pub fn minimal_machine(registry: &OperationRegistry) -> MinimalMachine {
    let mut b = MachineBuilder::new("minimal");
    b.bus("b0", 32, 8);
    b.bus("b1", 32, 8);

    let rf = b.register_file("RF", 32, 16, 2, 2, 1);
    let bool_rf = b.register_file("BOOL", 1, 2, 1, 1, 1);
    b.register_guard(bool_rf, 0, false);
    b.register_guard(bool_rf, 0, true);

    let alu = b.function_unit("ALU");
    let in1 = b.input_port(alu, "ALU.in1", 32, false);
    let in1t = b.input_port(alu, "ALU.in1t", 32, true);
    let out1 = b.output_port(alu, "ALU.out1", 32);
    for name in ["add", "sub", "mul", "and", "ior", "xor", "eq", "ne", "gt", "gtu", "shl", "shr"] {
        let op = registry.expect(name);
        let latency = registry.get(op).latency(3);
        b.bind(alu, op, &[(1, in1), (2, in1t), (3, out1)], &[(3, latency)]);
    }

    let lsu = b.function_unit("LSU");
    let addr = b.input_port(lsu, "LSU.addr", 32, true);
    let data = b.input_port(lsu, "LSU.data", 32, false);
    let ldata = b.output_port(lsu, "LSU.out", 32);
    let ldw = registry.expect("ldw");
    let stw = registry.expect("stw");
    b.bind(lsu, ldw, &[(1, addr), (2, ldata)], &[(2, registry.get(ldw).latency(2))]);
    b.bind(lsu, stw, &[(1, addr), (2, data)], &[]);

    let gcu = b.control_unit("GCU", 3);
    let pc = b.input_port(gcu, "GCU.pc", 32, true);
    let jump = registry.expect("jump");
    let call = registry.expect("call");
    b.bind(gcu, jump, &[(1, pc)], &[]);
    b.bind(gcu, call, &[(1, pc)], &[]);

    b.fully_connect();
    let machine = b.finish();
    MinimalMachine {
        machine,
        rf,
        bool_rf,
        alu,
        lsu: Some(lsu),
        gcu,
    }
}

/// A machine with a single ALU implementing only the named operations.
///
/// Useful for provoking `InvalidMachine` failures and for the canonical
/// single-operation scheduling scenarios.
pub fn single_alu_machine(registry: &OperationRegistry, ops: &[&str]) -> MinimalMachine {
    let mut b = MachineBuilder::new("single-alu");
    b.bus("b0", 32, 8);
    b.bus("b1", 32, 8);

    let rf = b.register_file("RF", 32, 16, 2, 2, 1);
    let bool_rf = b.register_file("BOOL", 1, 2, 1, 1, 1);
    b.register_guard(bool_rf, 0, false);
    b.register_guard(bool_rf, 0, true);

    let alu = b.function_unit("ALU");
    let in1 = b.input_port(alu, "ALU.in1", 32, false);
    let in1t = b.input_port(alu, "ALU.in1t", 32, true);
    let out1 = b.output_port(alu, "ALU.out1", 32);
    for name in ops {
        let op = registry.expect(name);
        let desc = registry.get(op);
        match desc.inputs {
            1 => b.bind(alu, op, &[(1, in1t), (2, out1)], &[(2, desc.latency(2))]),
            _ => b.bind(alu, op, &[(1, in1), (2, in1t), (3, out1)], &[(3, desc.latency(3))]),
        }
    }

    let gcu = b.control_unit("GCU", 3);
    let pc = b.input_port(gcu, "GCU.pc", 32, true);
    let jump = registry.expect("jump");
    b.bind(gcu, jump, &[(1, pc)], &[]);

    b.fully_connect();
    let machine = b.finish();
    MinimalMachine {
        machine,
        rf,
        bool_rf,
        alu,
        lsu: None,
        gcu,
    }
}

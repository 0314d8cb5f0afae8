//! Architecture model for transport-triggered targets.
//!
//! A [Machine] describes the transport resources a schedule must fit into:
//! buses, sockets, function units and their ports, register files,
//! immediate units and the instruction templates that carry long
//! immediates. The [OperationRegistry] describes operation semantics
//! independently of any particular unit: operand shapes, commutativity,
//! memory and control-flow behavior, and default latencies.
//!
//! Everything here is read-only during scheduling. Entity ids are assigned
//! in builder insertion order, so any iteration over machine parts is
//! deterministic.

mod dag;
mod info;
mod machine;
mod opset;
mod parts;
pub mod testing;

pub use self::{
    dag::{OperationDag, OperationDagSelector},
    info::MachineInfo,
    machine::{ControlUnitInfo, Machine, MachineBuilder},
    opset::{OpId, OperationDesc, OperationRegistry},
    parts::{
        Bus, BusId, FuId, FuKind, FunctionUnit, Guard, GuardId, GuardSource, HwOperation,
        ImmUnitId, ImmediateUnit, InstructionTemplate, Port, PortDirection, PortId, PortOwner,
        RegisterFile, RfId, RfKind, Socket, SocketDirection, SocketId, TemplateId, TemplateSlot,
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_machine_validates() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        m.machine.validate(&registry).unwrap();
    }

    #[test]
    fn trigger_operand_is_unique_on_minimal_machine() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let add = registry.expect("add");
        // The ALU binds operand 2 of every binary operation to the trigger.
        assert_eq!(m.machine.trigger_operand(add), Some(2));
        let ldw = registry.expect("ldw");
        assert_eq!(m.machine.trigger_operand(ldw), Some(1));
    }

    #[test]
    fn buses_connecting_respects_sockets() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let rf_read = m.machine.rf_read_ports(m.rf).next().unwrap();
        let trigger = m.machine.trigger_port(m.alu).unwrap();
        // Fully connected: both buses are candidates, in id order.
        let buses = m.machine.buses_connecting(rf_read, trigger);
        assert_eq!(buses.len(), 2);
        assert!(buses[0] < buses[1]);
    }

    #[test]
    fn universal_fu_cannot_be_renamed() {
        let mut b = MachineBuilder::new("uni");
        let normal = b.function_unit("ALU");
        let universal = b.universal_function_unit("UNIVERSAL");
        let mut machine = b.finish();
        machine.rename_fu(normal, "ALU2").unwrap();
        assert!(machine.rename_fu(universal, "renamed").is_err());
    }
}

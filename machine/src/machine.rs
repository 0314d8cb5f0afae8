use cranelift_entity::PrimaryMap;
use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};
use ttac_session::ScheduleError;

use crate::{
    parts::*,
    opset::{OpId, OperationRegistry},
};

/// Global control unit parameters.
#[derive(Debug, Clone, Default)]
pub struct ControlUnitInfo {
    pub fu: Option<FuId>,
    /// Delay slots after a taken control-flow move.
    pub delay_slots: u32,
    /// Guard latency added on top of the source register file's own.
    pub global_guard_latency: u32,
}

/// Read-only description of one target machine.
///
/// All scheduling-time queries go through this type; nothing here is mutated
/// while a schedule is being constructed. Entity ids are stable and
/// deterministic, assigned in builder insertion order.
#[derive(Debug, Default)]
pub struct Machine {
    pub name: String,
    buses: PrimaryMap<BusId, Bus>,
    sockets: PrimaryMap<SocketId, Socket>,
    ports: PrimaryMap<PortId, Port>,
    fus: PrimaryMap<FuId, FunctionUnit>,
    rfs: PrimaryMap<RfId, RegisterFile>,
    imm_units: PrimaryMap<ImmUnitId, ImmediateUnit>,
    templates: PrimaryMap<TemplateId, InstructionTemplate>,
    guards: PrimaryMap<GuardId, Guard>,
    control: ControlUnitInfo,
}

impl Machine {
    pub fn bus(&self, id: BusId) -> &Bus {
        &self.buses[id]
    }

    pub fn buses(&self) -> impl Iterator<Item = (BusId, &Bus)> {
        self.buses.iter()
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn socket(&self, id: SocketId) -> &Socket {
        &self.sockets[id]
    }

    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id]
    }

    pub fn ports(&self) -> impl Iterator<Item = (PortId, &Port)> {
        self.ports.iter()
    }

    pub fn fu(&self, id: FuId) -> &FunctionUnit {
        &self.fus[id]
    }

    pub fn fus(&self) -> impl Iterator<Item = (FuId, &FunctionUnit)> {
        self.fus.iter()
    }

    pub fn rf(&self, id: RfId) -> &RegisterFile {
        &self.rfs[id]
    }

    pub fn rfs(&self) -> impl Iterator<Item = (RfId, &RegisterFile)> {
        self.rfs.iter()
    }

    pub fn imm_unit(&self, id: ImmUnitId) -> &ImmediateUnit {
        &self.imm_units[id]
    }

    pub fn imm_units(&self) -> impl Iterator<Item = (ImmUnitId, &ImmediateUnit)> {
        self.imm_units.iter()
    }

    pub fn template(&self, id: TemplateId) -> &InstructionTemplate {
        &self.templates[id]
    }

    pub fn templates(&self) -> impl Iterator<Item = (TemplateId, &InstructionTemplate)> {
        self.templates.iter()
    }

    pub fn guard(&self, id: GuardId) -> &Guard {
        &self.guards[id]
    }

    pub fn guards(&self) -> impl Iterator<Item = (GuardId, &Guard)> {
        self.guards.iter()
    }

    pub fn control_unit(&self) -> &ControlUnitInfo {
        &self.control
    }

    /// Rename a function unit.
    ///
    /// Universal units are placeholders shared by every compilation and may
    /// never be renamed; doing so is reported as a machine error, not a
    /// panic.
    pub fn rename_fu(&mut self, id: FuId, name: impl Into<String>) -> Result<(), ScheduleError> {
        let fu = &mut self.fus[id];
        if fu.kind == FuKind::Universal {
            return Err(ScheduleError::invalid_machine(
                fu.name.clone(),
                "universal function units cannot be renamed",
            ));
        }
        fu.name = name.into();
        Ok(())
    }

    /// Function units implementing `op`, in id order.
    pub fn fus_implementing(&self, op: OpId) -> impl Iterator<Item = FuId> + '_ {
        self.fus
            .iter()
            .filter(move |(_, fu)| fu.implements(op))
            .map(|(id, _)| id)
    }

    pub fn supports(&self, op: OpId) -> bool {
        self.fus_implementing(op).next().is_some()
    }

    /// Every operation some FU of this machine implements.
    pub fn opset(&self) -> FxHashSet<OpId> {
        let mut set = FxHashSet::default();
        for (_, fu) in self.fus.iter() {
            set.extend(fu.operations.iter().map(|hw| hw.op));
        }
        set
    }

    /// The triggering input port of `fu`, if it has one.
    pub fn trigger_port(&self, fu: FuId) -> Option<PortId> {
        self.fus[fu]
            .ports
            .iter()
            .copied()
            .find(|p| self.ports[*p].triggering)
    }

    /// The operand index that must be the trigger for `op`, when every FU
    /// implementing it agrees. `None` when the machine leaves a choice.
    pub fn trigger_operand(&self, op: OpId) -> Option<u8> {
        let mut result = None;
        for fu in self.fus_implementing(op) {
            let tp = self.trigger_port(fu)?;
            let operand = self.fus[fu].hw_operation(op)?.operand_of(tp)?;
            match result {
                None => result = Some(operand),
                Some(prev) if prev == operand => {}
                Some(_) => return None,
            }
        }
        result
    }

    /// Buses a port can drive or read, via its socket.
    pub fn buses_of_port(&self, port: PortId) -> &[BusId] {
        match self.ports[port].socket {
            Some(s) => &self.sockets[s].buses,
            None => &[],
        }
    }

    /// Buses usable for a transport from `src` to `dst`, in id order.
    pub fn buses_connecting(&self, src: PortId, dst: PortId) -> SmallVec<[BusId; 4]> {
        let dst_buses = self.buses_of_port(dst);
        let mut found: SmallVec<[BusId; 4]> = self
            .buses_of_port(src)
            .iter()
            .copied()
            .filter(|b| dst_buses.contains(b))
            .collect();
        found.sort_unstable();
        found
    }

    /// Output ports of a register file (the ones a read drives a bus from).
    pub fn rf_read_ports(&self, rf: RfId) -> impl Iterator<Item = PortId> + '_ {
        self.rfs[rf]
            .ports
            .iter()
            .copied()
            .filter(|p| self.ports[*p].direction == PortDirection::Output)
    }

    pub fn rf_write_ports(&self, rf: RfId) -> impl Iterator<Item = PortId> + '_ {
        self.rfs[rf]
            .ports
            .iter()
            .copied()
            .filter(|p| self.ports[*p].direction == PortDirection::Input)
    }

    /// A guard with the given source and polarity, if the machine has one.
    pub fn find_guard(&self, source: GuardSource, inverted: bool) -> Option<GuardId> {
        self.guards
            .iter()
            .find(|(_, g)| g.source == source && g.inverted == inverted)
            .map(|(id, _)| id)
    }

    /// Longest latency of any operation binding on the machine. Used to
    /// bound how far below the schedule a retry may still succeed.
    pub fn maximum_latency(&self) -> u32 {
        self.fus
            .iter()
            .flat_map(|(_, fu)| fu.operations.iter())
            .map(|hw| hw.max_latency())
            .max()
            .unwrap_or(1)
    }

    /// Structural validation run once before scheduling.
    pub fn validate(&self, registry: &OperationRegistry) -> Result<(), ScheduleError> {
        for (_, fu) in self.fus.iter() {
            if fu.kind == FuKind::Universal {
                continue;
            }
            let triggers = fu
                .ports
                .iter()
                .filter(|p| self.ports[**p].triggering)
                .count();
            if !fu.operations.is_empty() && triggers != 1 {
                return Err(ScheduleError::invalid_machine(
                    fu.name.clone(),
                    format!("function unit must have exactly one triggering port, has {triggers}"),
                ));
            }
            for hw in &fu.operations {
                let desc = registry.get(hw.op);
                for operand in 1..=desc.inputs {
                    let Some(port) = hw.port_of(operand) else {
                        return Err(ScheduleError::invalid_machine(
                            desc.name.clone(),
                            format!("operand {operand} is not bound to any port of {}", fu.name),
                        ));
                    };
                    if self.ports[port].direction != PortDirection::Input {
                        return Err(ScheduleError::invalid_machine(
                            desc.name.clone(),
                            format!("operand {operand} bound to non-input port on {}", fu.name),
                        ));
                    }
                }
                for k in 1..=desc.outputs {
                    let operand = desc.inputs + k;
                    if hw.latency(operand).is_none() {
                        return Err(ScheduleError::invalid_machine(
                            desc.name.clone(),
                            format!("output {operand} has no latency on {}", fu.name),
                        ));
                    }
                }
            }
        }
        for (_, socket) in self.sockets.iter() {
            if socket.buses.is_empty() {
                return Err(ScheduleError::invalid_machine(
                    socket.name.clone(),
                    "socket connects no buses",
                ));
            }
        }
        Ok(())
    }
}

/// Incremental [Machine] constructor.
///
/// Ids are handed out in insertion order, which also fixes all iteration
/// orders downstream.
pub struct MachineBuilder {
    machine: Machine,
    attach_guards_to_all_buses: bool,
}

impl MachineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let mut machine = Machine::default();
        machine.name = name.into();
        Self {
            machine,
            attach_guards_to_all_buses: true,
        }
    }

    pub fn bus(&mut self, name: impl Into<String>, width: u32, imm_width: u32) -> BusId {
        self.machine.buses.push(Bus {
            name: name.into(),
            width,
            imm_width,
            signed_imm: true,
            guards: smallvec![],
        })
    }

    pub fn register_file(
        &mut self,
        name: impl Into<String>,
        width: u32,
        size: u32,
        read_ports: u32,
        write_ports: u32,
        guard_latency: u32,
    ) -> RfId {
        let name = name.into();
        let rf = self.machine.rfs.push(RegisterFile {
            name: name.clone(),
            kind: RfKind::Normal,
            width,
            size,
            ports: smallvec![],
            guard_latency,
        });
        for i in 0..read_ports {
            let p = self.machine.ports.push(Port {
                name: format!("{name}.rd{i}"),
                width,
                direction: PortDirection::Output,
                owner: PortOwner::Rf(rf),
                triggering: false,
                opcode_setting: false,
                socket: None,
            });
            self.machine.rfs[rf].ports.push(p);
        }
        for i in 0..write_ports {
            let p = self.machine.ports.push(Port {
                name: format!("{name}.wr{i}"),
                width,
                direction: PortDirection::Input,
                owner: PortOwner::Rf(rf),
                triggering: false,
                opcode_setting: false,
                socket: None,
            });
            self.machine.rfs[rf].ports.push(p);
        }
        rf
    }

    /// The unbounded register file of the universal machine.
    pub fn universal_register_file(&mut self, name: impl Into<String>, width: u32) -> RfId {
        let name = name.into();
        let rf = self.machine.rfs.push(RegisterFile {
            name: name.clone(),
            kind: RfKind::Universal,
            width,
            size: u32::MAX,
            ports: smallvec![],
            guard_latency: 1,
        });
        for (dir, suffix) in [(PortDirection::Output, "rd"), (PortDirection::Input, "wr")] {
            let p = self.machine.ports.push(Port {
                name: format!("{name}.{suffix}"),
                width,
                direction: dir,
                owner: PortOwner::Rf(rf),
                triggering: false,
                opcode_setting: false,
                socket: None,
            });
            self.machine.rfs[rf].ports.push(p);
        }
        rf
    }

    pub fn immediate_unit(
        &mut self,
        name: impl Into<String>,
        width: u32,
        size: u32,
    ) -> ImmUnitId {
        let name = name.into();
        let iu = self.machine.imm_units.push(ImmediateUnit {
            name: name.clone(),
            width,
            size,
            latency: 1,
            ports: smallvec![],
            signed: true,
        });
        let p = self.machine.ports.push(Port {
            name: format!("{name}.rd"),
            width,
            direction: PortDirection::Output,
            owner: PortOwner::ImmUnit(iu),
            triggering: false,
            opcode_setting: false,
            socket: None,
        });
        self.machine.imm_units[iu].ports.push(p);
        iu
    }

    pub fn instruction_template(
        &mut self,
        name: impl Into<String>,
        slots: &[(BusId, u32, ImmUnitId)],
    ) -> TemplateId {
        self.machine.templates.push(InstructionTemplate {
            name: name.into(),
            slots: slots
                .iter()
                .map(|&(bus, width, destination)| TemplateSlot {
                    bus,
                    width,
                    destination,
                })
                .collect(),
        })
    }

    pub fn function_unit(&mut self, name: impl Into<String>) -> FuId {
        self.machine.fus.push(FunctionUnit {
            name: name.into(),
            kind: FuKind::Normal,
            ports: smallvec![],
            operations: Vec::new(),
        })
    }

    /// Placeholder unit of the universal machine; implements nothing until
    /// bound, and can never be renamed.
    pub fn universal_function_unit(&mut self, name: impl Into<String>) -> FuId {
        self.machine.fus.push(FunctionUnit {
            name: name.into(),
            kind: FuKind::Universal,
            ports: smallvec![],
            operations: Vec::new(),
        })
    }

    pub fn control_unit(&mut self, name: impl Into<String>, delay_slots: u32) -> FuId {
        let fu = self.machine.fus.push(FunctionUnit {
            name: name.into(),
            kind: FuKind::ControlUnit,
            ports: smallvec![],
            operations: Vec::new(),
        });
        self.machine.control = ControlUnitInfo {
            fu: Some(fu),
            delay_slots,
            global_guard_latency: 0,
        };
        fu
    }

    pub fn input_port(
        &mut self,
        fu: FuId,
        name: impl Into<String>,
        width: u32,
        triggering: bool,
    ) -> PortId {
        let p = self.machine.ports.push(Port {
            name: name.into(),
            width,
            direction: PortDirection::Input,
            owner: PortOwner::Fu(fu),
            triggering,
            // On this model the trigger port always also sets the opcode.
            opcode_setting: triggering,
            socket: None,
        });
        self.machine.fus[fu].ports.push(p);
        p
    }

    pub fn output_port(&mut self, fu: FuId, name: impl Into<String>, width: u32) -> PortId {
        let p = self.machine.ports.push(Port {
            name: name.into(),
            width,
            direction: PortDirection::Output,
            owner: PortOwner::Fu(fu),
            triggering: false,
            opcode_setting: false,
            socket: None,
        });
        self.machine.fus[fu].ports.push(p);
        p
    }

    pub fn bind(
        &mut self,
        fu: FuId,
        op: OpId,
        bindings: &[(u8, PortId)],
        latencies: &[(u8, u32)],
    ) {
        self.machine.fus[fu].operations.push(HwOperation {
            op,
            bindings: bindings.iter().copied().collect(),
            latencies: latencies.iter().copied().collect(),
        });
    }

    pub fn register_guard(&mut self, rf: RfId, index: u16, inverted: bool) -> GuardId {
        self.machine.guards.push(Guard {
            source: GuardSource::Register { rf, index },
            inverted,
        })
    }

    pub fn port_guard(&mut self, fu: FuId, port: PortId, inverted: bool) -> GuardId {
        self.machine.guards.push(Guard {
            source: GuardSource::FuPort { fu, port },
            inverted,
        })
    }

    /// Connect every port to every bus through one socket per port.
    ///
    /// Real machines have sparser connectivity; tests and the universal
    /// machine use this.
    pub fn fully_connect(&mut self) {
        let all_buses: SmallVec<[BusId; 4]> =
            self.machine.buses.iter().map(|(id, _)| id).collect();
        let port_ids: Vec<PortId> = self.machine.ports.iter().map(|(id, _)| id).collect();
        for port in port_ids {
            if self.machine.ports[port].socket.is_some() {
                continue;
            }
            let direction = match self.machine.ports[port].direction {
                PortDirection::Input => SocketDirection::Input,
                PortDirection::Output => SocketDirection::Output,
            };
            let socket = self.machine.sockets.push(Socket {
                name: format!("{}.sock", self.machine.ports[port].name),
                direction,
                buses: all_buses.clone(),
            });
            self.machine.ports[port].socket = Some(socket);
        }
    }

    pub fn connect(&mut self, port: PortId, buses: &[BusId]) -> SocketId {
        let direction = match self.machine.ports[port].direction {
            PortDirection::Input => SocketDirection::Input,
            PortDirection::Output => SocketDirection::Output,
        };
        let socket = self.machine.sockets.push(Socket {
            name: format!("{}.sock", self.machine.ports[port].name),
            direction,
            buses: buses.iter().copied().collect(),
        });
        self.machine.ports[port].socket = Some(socket);
        socket
    }

    pub fn finish(mut self) -> Machine {
        if self.attach_guards_to_all_buses {
            let guard_ids: SmallVec<[GuardId; 4]> =
                self.machine.guards.iter().map(|(id, _)| id).collect();
            for (_, bus) in self.machine.buses.iter_mut() {
                bus.guards = guard_ids.clone();
            }
        }
        self.machine
    }
}

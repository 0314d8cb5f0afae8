use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::OpId;

/// A transport bus.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BusId(u32);
entity_impl!(BusId, "bus");

/// A socket connecting ports to buses.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u32);
entity_impl!(SocketId, "socket");

/// A port of a function unit, register file or immediate unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u32);
entity_impl!(PortId, "port");

/// A function unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuId(u32);
entity_impl!(FuId, "fu");

/// A register file.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RfId(u32);
entity_impl!(RfId, "rf");

/// An immediate unit.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImmUnitId(u32);
entity_impl!(ImmUnitId, "imm");

/// An instruction template for long-immediate encoding.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(u32);
entity_impl!(TemplateId, "tmpl");

/// A guard expression usable on some bus.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuardId(u32);
entity_impl!(GuardId, "guard");

/// A single transport bus: one move per cycle, with a short-immediate field
/// and the set of guard expressions that can predicate a move on it.
#[derive(Debug, Clone)]
pub struct Bus {
    pub name: String,
    /// Transport width in bits.
    pub width: u32,
    /// Width of the short-immediate field, 0 if the bus carries none.
    pub imm_width: u32,
    /// Whether the short-immediate field sign-extends.
    pub signed_imm: bool,
    /// Guards available on this bus. Every bus implicitly supports the
    /// unconditional move.
    pub guards: SmallVec<[GuardId; 4]>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SocketDirection {
    /// Reads from a bus into a port.
    Input,
    /// Drives a bus from a port.
    Output,
}

#[derive(Debug, Clone)]
pub struct Socket {
    pub name: String,
    pub direction: SocketDirection,
    pub buses: SmallVec<[BusId; 4]>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// What a port belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PortOwner {
    Fu(FuId),
    Rf(RfId),
    ImmUnit(ImmUnitId),
}

#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub width: u32,
    pub direction: PortDirection,
    pub owner: PortOwner,
    /// Writing this port starts the owning FU's operation.
    pub triggering: bool,
    /// Writing this port selects the opcode.
    pub opcode_setting: bool,
    pub socket: Option<SocketId>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum FuKind {
    #[default]
    Normal,
    /// The global control unit; moves targeting it are control-flow moves.
    ControlUnit,
    /// Placeholder unit of the universal machine, before resource binding.
    Universal,
}

/// Binding of one operation onto one function unit: which operand lands on
/// which port, and the latency of each output.
#[derive(Debug, Clone)]
pub struct HwOperation {
    pub op: OpId,
    /// `(operand index, port)` pairs; operand indices are 1-based, outputs
    /// continue past the inputs.
    pub bindings: SmallVec<[(u8, PortId); 4]>,
    /// `(output operand index, latency)`; indices are absolute, i.e. the
    /// first output of a 2-input operation is operand 3.
    pub latencies: SmallVec<[(u8, u32); 2]>,
}

impl HwOperation {
    pub fn port_of(&self, operand: u8) -> Option<PortId> {
        self.bindings.iter().find(|(i, _)| *i == operand).map(|(_, p)| *p)
    }

    pub fn operand_of(&self, port: PortId) -> Option<u8> {
        self.bindings.iter().find(|(_, p)| *p == port).map(|(i, _)| *i)
    }

    pub fn latency(&self, output_operand: u8) -> Option<u32> {
        self.latencies.iter().find(|(i, _)| *i == output_operand).map(|(_, l)| *l)
    }

    /// The longest output latency of this binding.
    pub fn max_latency(&self) -> u32 {
        self.latencies.iter().map(|(_, l)| *l).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct FunctionUnit {
    pub name: String,
    pub kind: FuKind,
    pub ports: SmallVec<[PortId; 4]>,
    pub operations: Vec<HwOperation>,
}

impl FunctionUnit {
    pub fn hw_operation(&self, op: OpId) -> Option<&HwOperation> {
        self.operations.iter().find(|hw| hw.op == op)
    }

    pub fn implements(&self, op: OpId) -> bool {
        self.hw_operation(op).is_some()
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum RfKind {
    #[default]
    Normal,
    /// The unbounded register file of the universal machine. Moves touching
    /// it are not yet bound to real storage and must be scheduled together
    /// with their producer/consumer.
    Universal,
}

#[derive(Debug, Clone)]
pub struct RegisterFile {
    pub name: String,
    pub kind: RfKind,
    pub width: u32,
    /// Number of registers.
    pub size: u32,
    pub ports: SmallVec<[PortId; 4]>,
    /// Cycles between writing a guard register and the guard taking effect.
    pub guard_latency: u32,
}

#[derive(Debug, Clone)]
pub struct ImmediateUnit {
    pub name: String,
    pub width: u32,
    /// Number of immediate registers.
    pub size: u32,
    /// Cycles from template write to the value being readable.
    pub latency: u32,
    pub ports: SmallVec<[PortId; 2]>,
    /// Whether values sign-extend on read.
    pub signed: bool,
}

/// One slot of an instruction template: the given bus' move field is
/// repurposed to carry `width` bits of a long immediate destined for
/// `destination`.
#[derive(Debug, Clone)]
pub struct TemplateSlot {
    pub bus: BusId,
    pub width: u32,
    pub destination: ImmUnitId,
}

#[derive(Debug, Clone)]
pub struct InstructionTemplate {
    pub name: String,
    pub slots: SmallVec<[TemplateSlot; 2]>,
}

impl InstructionTemplate {
    /// Total immediate bits this template can deliver to `unit` in one cycle.
    pub fn supported_width(&self, unit: ImmUnitId) -> u32 {
        self.slots.iter().filter(|s| s.destination == unit).map(|s| s.width).sum()
    }

    pub fn uses_bus(&self, bus: BusId) -> bool {
        self.slots.iter().any(|s| s.bus == bus)
    }
}

/// Source of a guard value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuardSource {
    /// A boolean register.
    Register { rf: RfId, index: u16 },
    /// An FU output port, valid the same cycle the result appears.
    FuPort { fu: FuId, port: PortId },
    /// The always-true guard.
    Always,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Guard {
    pub source: GuardSource,
    pub inverted: bool,
}

impl Guard {
    /// Guards that can never be true at the same time: same source, opposite
    /// polarity.
    pub fn excludes(&self, other: &Guard) -> bool {
        self.source == other.source && self.inverted != other.inverted
    }
}

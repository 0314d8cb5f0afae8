use ttac_machine::{FuId, OpId, OperationRegistry};

use crate::terminal::{RegRef, Terminal};

/// Source of a guard value on a move.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GuardSrc {
    /// A (boolean) register.
    Register(RegRef),
    /// An FU output, valid the cycle the result appears.
    FuPort { fu: FuId, op: OpId, operand: u8 },
}

/// Predicate attached to a move: the move takes effect only when the guard
/// value (possibly inverted) is true.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MoveGuard {
    pub source: GuardSrc,
    pub inverted: bool,
}

impl MoveGuard {
    pub fn reg(r: RegRef, inverted: bool) -> Self {
        Self {
            source: GuardSrc::Register(r),
            inverted,
        }
    }

    /// The register this guard reads, if it is a register guard.
    pub fn guard_register(&self) -> Option<RegRef> {
        match self.source {
            GuardSrc::Register(r) => Some(r),
            GuardSrc::FuPort { .. } => None,
        }
    }

    /// Guards that can never both be true: same source, opposite polarity.
    pub fn excludes(&self, other: &MoveGuard) -> bool {
        self.source == other.source && self.inverted != other.inverted
    }
}

/// A single transport: source to destination in one cycle over one bus.
///
/// The bus and cycle live in the resource manager's assignment record, not
/// here; a `Move` is pure program content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub source: Terminal,
    pub destination: Terminal,
    pub guard: Option<MoveGuard>,
}

impl Move {
    pub fn new(source: Terminal, destination: Terminal) -> Self {
        Self {
            source,
            destination,
            guard: None,
        }
    }

    pub fn guarded(source: Terminal, destination: Terminal, guard: MoveGuard) -> Self {
        Self {
            source,
            destination,
            guard: Some(guard),
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.guard.is_none()
    }

    /// Whether this move targets the control unit, i.e. is a jump or call.
    pub fn is_control_flow(&self, registry: &OperationRegistry) -> bool {
        match self.destination {
            Terminal::FuPort { op, .. } => registry.get(op).control_flow,
            _ => false,
        }
    }

    pub fn is_call(&self, registry: &OperationRegistry) -> bool {
        match self.destination {
            Terminal::FuPort { op, .. } => registry.get(op).is_call,
            _ => false,
        }
    }

    pub fn reads_register(&self, r: RegRef) -> bool {
        self.source.as_register() == Some(r)
    }

    pub fn writes_register(&self, r: RegRef) -> bool {
        self.destination.as_register() == Some(r)
    }
}

impl core::fmt::Display for Move {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(g) = &self.guard {
            let bang = if g.inverted { "!" } else { "?" };
            match g.source {
                GuardSrc::Register(r) => write!(f, "{bang}{r} ")?,
                GuardSrc::FuPort { fu, op, operand } => write!(f, "{bang}{fu}.{op}.{operand} ")?,
            }
        }
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

use cranelift_entity::entity_impl;
use ttac_program::{MoveNodeId, RegRef};

/// A dependence edge in the graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(u32);
entity_impl!(EdgeId, "e");

/// Why two moves are ordered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeKind {
    Register,
    Memory,
    FuState,
    Operation,
    ReturnAddress,
}

/// The flavor of ordering.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DepType {
    Unknown,
    Raw,
    War,
    Waw,
    /// Operand-to-trigger ordering inside one program operation.
    Trigger,
}

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct EdgeFlags: u8 {
        /// The head reads the value only through its guard.
        const GUARD = 1 << 0;
        /// An alias analyzer proved the accesses overlap.
        const CERTAIN_ALIAS = 1 << 1;
        /// The tail does not itself touch the data; it is a control-flow
        /// move that may cause the access.
        const TAIL_PSEUDO = 1 << 2;
        /// Same, for the head.
        const HEAD_PSEUDO = 1 << 3;
    }
}

/// What data the dependence is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeData {
    Register(RegRef),
    /// Alias class tag for a memory dependence.
    Memory(String),
}

/// A typed, attributed dependence between two move nodes.
///
/// Kept small; large blocks have a great many of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDependenceEdge {
    pub kind: EdgeKind,
    pub dep: DepType,
    pub flags: EdgeFlags,
    pub data: Option<EdgeData>,
    /// 0 for an intra-iteration edge, n for an n-iteration loop carry.
    pub loop_distance: u8,
}

impl DataDependenceEdge {
    pub fn new(kind: EdgeKind, dep: DepType) -> Self {
        Self {
            kind,
            dep,
            flags: EdgeFlags::default(),
            data: None,
            loop_distance: 0,
        }
    }

    pub fn register(dep: DepType, reg: RegRef) -> Self {
        Self {
            kind: EdgeKind::Register,
            dep,
            flags: EdgeFlags::default(),
            data: Some(EdgeData::Register(reg)),
            loop_distance: 0,
        }
    }

    pub fn with_flags(mut self, flags: EdgeFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_loop_distance(mut self, distance: u8) -> Self {
        self.loop_distance = distance;
        self
    }

    #[inline]
    pub fn is_back_edge(&self) -> bool {
        self.loop_distance != 0
    }

    #[inline]
    pub fn is_raw(&self) -> bool {
        self.dep == DepType::Raw
    }

    #[inline]
    pub fn is_waw(&self) -> bool {
        self.dep == DepType::Waw
    }

    #[inline]
    pub fn is_guard_use(&self) -> bool {
        self.flags.contains(EdgeFlags::GUARD)
    }

    #[inline]
    pub fn is_certain_alias(&self) -> bool {
        self.flags.contains(EdgeFlags::CERTAIN_ALIAS)
    }

    /// WAR and WAW dependences outside operation edges carry no value; they
    /// only constrain ordering and can be removed by renaming.
    pub fn is_false_dep(&self) -> bool {
        self.kind != EdgeKind::Operation && matches!(self.dep, DepType::War | DepType::Waw)
    }

    pub fn is_register_or_ra(&self) -> bool {
        matches!(self.kind, EdgeKind::Register | EdgeKind::ReturnAddress)
    }

    pub fn data_register(&self) -> Option<RegRef> {
        match &self.data {
            Some(EdgeData::Register(r)) => Some(*r),
            _ => None,
        }
    }
}

/// An edge plus its endpoints as stored in the graph arena.
///
/// Detached records stay in the arena so a dropped node's edges can be
/// re-attached exactly as they were.
#[derive(Debug, Clone)]
pub struct EdgeRecord {
    pub edge: DataDependenceEdge,
    pub tail: MoveNodeId,
    pub head: MoveNodeId,
    pub detached: bool,
}

impl core::fmt::Display for DataDependenceEdge {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let kind = match self.kind {
            EdgeKind::Register => "R",
            EdgeKind::Memory => "M",
            EdgeKind::FuState => "F",
            EdgeKind::Operation => "O",
            EdgeKind::ReturnAddress => "RA",
        };
        let dep = match self.dep {
            DepType::Unknown => "",
            DepType::Raw => "_raw",
            DepType::War => "_war",
            DepType::Waw => "_waw",
            DepType::Trigger => "_trg",
        };
        write!(f, "{kind}{dep}")?;
        if self.is_guard_use() {
            f.write_str("_G")?;
        }
        if self.is_certain_alias() {
            f.write_str("_AL")?;
        }
        match &self.data {
            Some(EdgeData::Register(r)) => write!(f, ":{r}")?,
            Some(EdgeData::Memory(tag)) => write!(f, ":{tag}")?,
            None => {}
        }
        if self.is_back_edge() {
            write!(f, " (ld={})", self.loop_distance)?;
        }
        Ok(())
    }
}

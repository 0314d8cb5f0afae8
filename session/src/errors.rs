use miette::Diagnostic;

/// The resource class a failed scheduling attempt ran out of.
///
/// Produced by the resource constraint analyzer after a [ScheduleError::SchedulingFailure]
/// so the diagnostic can name what actually limited the schedule instead of
/// a bare "could not schedule".
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LimitingResource {
    /// Every bus in the failing cycle window was already carrying a move.
    Buses,
    /// The operation's pipeline slot on every candidate function unit was taken.
    FuPipeline,
    /// No instruction template had a free long-immediate slot.
    ImmediateTemplates,
    /// A register file had no free read or write port left.
    RegisterFilePorts,
    /// A bus guard slot was occupied with an incompatible guard.
    Guards,
    /// Source and destination have no bus connecting them at all.
    Connectivity,
    /// The dependence graph alone forbids any cycle in the window.
    Dependences,
}

impl core::fmt::Display for LimitingResource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Buses => "bus capacity",
            Self::FuPipeline => "function unit pipeline",
            Self::ImmediateTemplates => "long-immediate template slots",
            Self::RegisterFilePorts => "register file ports",
            Self::Guards => "bus guard slots",
            Self::Connectivity => "bus connectivity",
            Self::Dependences => "data dependences",
        };
        f.write_str(s)
    }
}

/// Errors surfaced at the DDG/resource-manager/scheduler boundary.
///
/// Every error path in the core is a value of this type; none of the crates
/// abort the process. Recoverable failures inside the scheduler (a reversible
/// transformation that could not apply) never reach this type, they are
/// plain `bool`/`Option` results that leave the world unchanged.
#[derive(Debug, Clone, thiserror::Error, Diagnostic)]
pub enum ScheduleError {
    /// The scheduler exhausted every retry option on a move or front.
    ///
    /// In loop mode the initiation-interval search treats this as "try the
    /// next II"; in basic-block mode it is fatal for the block.
    #[error("cannot schedule move {node} on this machine{}", limit.map(|l| format!(" (limited by {l})")).unwrap_or_default())]
    #[diagnostic(code(ttac::scheduling_failure))]
    SchedulingFailure {
        /// Stable id of the move node that could not be placed.
        node: u32,
        /// What the resource constraint analyzer blamed, when it ran.
        limit: Option<LimitingResource>,
    },

    /// The machine description lacks a resource the program needs.
    #[error("machine cannot execute operation '{operation}': {reason}")]
    #[diagnostic(code(ttac::invalid_machine))]
    InvalidMachine { operation: String, reason: String },

    /// A literal that no immediate encoding on this machine can carry.
    ///
    /// The diagnostic pins the original literal, not any intermediate form a
    /// rewrite may have produced.
    #[error("immediate {literal} cannot be encoded by any bus or template of this machine")]
    #[diagnostic(
        code(ttac::unencodable_immediate),
        help("widen an immediate field or add a long-immediate template covering the value")
    )]
    UnencodableImmediate { literal: String },

    /// An emulation library function was needed but never registered.
    ///
    /// The typical cause is disabling the floating-point emulation library
    /// while compiling for a machine without hardware float support.
    #[error("no emulation function registered for footprint '{footprint}'")]
    #[diagnostic(code(ttac::missing_emulation))]
    MissingEmulation { footprint: String },

    /// An operation that would corrupt the graph or resource tables.
    ///
    /// These are programming errors: creating an intra-iteration edge that
    /// closes a cycle, unassigning a node that is not assigned, and so on.
    /// They fail fast with the identity of the offending node.
    #[error("graph invariant violated at node {node}: {what}")]
    #[diagnostic(code(ttac::graph_invariant))]
    GraphInvariantViolation { node: u32, what: String },
}

impl ScheduleError {
    pub fn invalid_machine(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMachine {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn invariant(node: u32, what: impl Into<String>) -> Self {
        Self::GraphInvariantViolation {
            node,
            what: what.into(),
        }
    }
}

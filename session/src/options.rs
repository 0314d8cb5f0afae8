/// Offset at which prolog/epilog copies are placed in the prolog resource
/// manager, so the prolog may grow longer than the loop body itself.
pub const PROLOG_CYCLE_BIAS: i32 = 1000;

/// How many register antidependence edges the DDG builder creates.
///
/// Fewer antideps give the scheduler more freedom but push the burden of
/// correctness onto later renaming; `All` is the conservative default.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AntidependenceLevel {
    /// No WAR/WAW register edges at all.
    None,
    /// Antidependences only between moves of the same basic block.
    IntraBlock,
    /// Intra-block antideps plus the loop-carried ones of a single-block loop.
    SingleBlockLoop,
    /// Antidependences across the whole region.
    #[default]
    All,
}

/// Variants of software-pipelined loop code generation.
///
/// The variants differ in whether an epilog exists, whether prolog moves are
/// predicated with the jump guard, and whether a hardware loop buffer
/// (static or dynamic trip count) is in use. The combined modes mirror the
/// configurations the loop scheduler actually selects between.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoopSchedulingMode(u16);

impl LoopSchedulingMode {
    pub const NO_LOOP_SCHEDULER: Self = Self(0);
    pub const ENABLE_LOOP_SCHEDULER: Self = Self(1);
    pub const HAS_EPILOG: Self = Self(1 << 1);
    pub const PREDICATE_PROLOG_MOVES: Self = Self(1 << 2);
    pub const GUARD_BETWEEN_ITERS: Self = Self(1 << 4);
    /// Schedule the jump guard write bottom-up like any other move.
    pub const GUARD_ALAP: Self = Self(1 << 5);
    pub const FOR_LOOP_BUFFER: Self = Self(1 << 6);
    pub const DYNAMIC_FOR_LOOP_BUFFER: Self = Self(1 << 7);
    pub const DECREMENT_DYNAMIC_COUNTER: Self = Self(1 << 8);
    pub const WHILE_LOOP_BUFFER: Self = Self(1 << 9);

    /// No loop buffer, prolog moves predicated, no epilog. Works for
    /// while-loops.
    pub const NO_LOOPBUF_PREDICATE_ALAP: Self =
        Self(Self::GUARD_ALAP.0 | Self::PREDICATE_PROLOG_MOVES.0);
    /// Static trip count, loop buffer, epilog.
    pub const STATIC_FORLOOP_BUFFER: Self = Self(Self::FOR_LOOP_BUFFER.0 | Self::HAS_EPILOG.0);
    /// Dynamic trip count of n+1 iterations, loop buffer, epilog.
    pub const DYNAMIC_FORLOOP_BUFFER: Self =
        Self(Self::FOR_LOOP_BUFFER.0 | Self::HAS_EPILOG.0 | Self::DYNAMIC_FOR_LOOP_BUFFER.0);
    /// Dynamic trip count of n, decremented to behave as n+1.
    pub const DYNAMIC_FORLOOP_BUFFER_DECREMENT: Self = Self(
        Self::FOR_LOOP_BUFFER.0
            | Self::HAS_EPILOG.0
            | Self::DYNAMIC_FOR_LOOP_BUFFER.0
            | Self::DECREMENT_DYNAMIC_COUNTER.0,
    );
    /// While-loop buffer with ALAP-scheduled predicated guard.
    pub const WHILE_LOOP_BUF_PREDICATE_ALAP: Self = Self(
        Self::WHILE_LOOP_BUFFER.0 | Self::GUARD_ALAP.0 | Self::PREDICATE_PROLOG_MOVES.0,
    );

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn has_epilog(self) -> bool {
        self.contains(Self::HAS_EPILOG)
    }

    pub fn predicates_prolog_moves(self) -> bool {
        self.contains(Self::PREDICATE_PROLOG_MOVES)
    }

    pub fn guard_between_iters(self) -> bool {
        self.contains(Self::GUARD_BETWEEN_ITERS)
    }

    /// Prolog moves are neither guarded nor drained by an epilog, so only
    /// speculatable moves may be copied there.
    pub fn only_speculated_prolog_moves(self) -> bool {
        !(self.has_epilog() || self.predicates_prolog_moves())
    }

    pub fn uses_loop_buffer(self) -> bool {
        self.contains(Self::FOR_LOOP_BUFFER) || self.contains(Self::WHILE_LOOP_BUFFER)
    }
}

/// Knobs of a single scheduler run. Read-only while scheduling.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Which register antidependences the DDG carries.
    pub antidependence_level: AntidependenceLevel,
    /// Remove result writes nobody reads.
    pub kill_dead_results: bool,
    /// Allow collapsing equal operand writes of different operations.
    pub operand_sharing: bool,
    /// Allow rewriting moves to read FU output ports directly.
    pub bypassing: bool,
    /// Minimum cycle gap a late bypass must win to be kept.
    pub late_bypass_gap: i32,
    /// How a pipelined loop is materialized around the kernel.
    pub loop_scheduling: LoopSchedulingMode,
    /// Largest initiation interval the loop search will try before giving
    /// up and scheduling the body as a plain basic block.
    pub max_initiation_interval: u32,
    /// Run the post-pass bypass/DRE sweep after a block is fully scheduled.
    pub postpass_optimization: bool,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            antidependence_level: AntidependenceLevel::All,
            kill_dead_results: true,
            operand_sharing: true,
            bypassing: true,
            late_bypass_gap: 3,
            loop_scheduling: LoopSchedulingMode::NO_LOOPBUF_PREDICATE_ALAP,
            max_initiation_interval: 64,
            postpass_optimization: true,
        }
    }
}

impl SchedulerOptions {
    pub fn with_antidependence_level(mut self, level: AntidependenceLevel) -> Self {
        self.antidependence_level = level;
        self
    }

    pub fn without_dead_result_elimination(mut self) -> Self {
        self.kill_dead_results = false;
        self
    }

    pub fn without_bypassing(mut self) -> Self {
        self.bypassing = false;
        self
    }

    pub fn with_loop_scheduling(mut self, mode: LoopSchedulingMode) -> Self {
        self.loop_scheduling = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_modes_decompose() {
        let m = LoopSchedulingMode::NO_LOOPBUF_PREDICATE_ALAP;
        assert!(m.predicates_prolog_moves());
        assert!(!m.has_epilog());
        assert!(!m.uses_loop_buffer());
        assert!(!m.only_speculated_prolog_moves());

        let m = LoopSchedulingMode::DYNAMIC_FORLOOP_BUFFER;
        assert!(m.has_epilog());
        assert!(m.uses_loop_buffer());
        assert!(m.contains(LoopSchedulingMode::DYNAMIC_FOR_LOOP_BUFFER));
        assert!(!m.contains(LoopSchedulingMode::DECREMENT_DYNAMIC_COUNTER));
    }

    #[test]
    fn default_options_are_conservative_about_correctness() {
        let o = SchedulerOptions::default();
        assert_eq!(o.antidependence_level, AntidependenceLevel::All);
        assert!(o.kill_dead_results);
        assert_eq!(o.late_bypass_gap, 3);
        let o = o.without_bypassing();
        assert!(!o.bypassing);
    }
}

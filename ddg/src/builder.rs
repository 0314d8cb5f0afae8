use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use ttac_machine::{Machine, OperationRegistry};
use ttac_program::{
    BasicBlock, BlockId, CfgEdgeKind, ControlFlowGraph, MoveNodeId, PoId, ProgramOperation,
    RegRef, Terminal,
};
use ttac_session::{AntidependenceLevel, ScheduleError, SchedulerOptions};

use crate::{
    alias::{AliasingResult, EdgeSpan, MemoryAliasAnalyzer},
    edge::{DataDependenceEdge, DepType, EdgeData, EdgeFlags, EdgeKind},
    Ddg,
};

/// Per-register wiring state while walking a block in program order.
#[derive(Default)]
struct RegState {
    /// Current definitions; guarded writes accumulate, an unconditional
    /// write replaces the set.
    last_writes: Vec<MoveNodeId>,
    /// Reads since the last write.
    reads_since_write: Vec<MoveNodeId>,
    seen_write: bool,
}

/// Builds a [Ddg] from basic blocks.
///
/// The builder owns the alias analyzers; they are consulted in registration
/// order for every ordered pair of memory operations, and the first
/// definite answer decides whether (and how certainly) a memory edge is
/// installed.
pub struct DdgBuilder<'a> {
    machine: &'a Machine,
    registry: &'a OperationRegistry,
    options: &'a SchedulerOptions,
    analyzers: Vec<Box<dyn MemoryAliasAnalyzer>>,
}

impl<'a> DdgBuilder<'a> {
    pub fn new(
        machine: &'a Machine,
        registry: &'a OperationRegistry,
        options: &'a SchedulerOptions,
    ) -> Self {
        Self {
            machine,
            registry,
            options,
            analyzers: vec![
                Box::new(crate::alias::ConstantAliasAnalyzer::new()),
                Box::new(crate::alias::OffsetAliasAnalyzer::new()),
            ],
        }
    }

    /// Register the stack-aware analyzers, given the stack pointer register
    /// of the calling convention.
    pub fn with_stack_pointer(mut self, sp: RegRef) -> Self {
        self.analyzers.push(Box::new(crate::alias::StackAliasAnalyzer::new(sp)));
        self.analyzers.push(Box::new(crate::alias::GlobalVsStackAliasAnalyzer::new(sp)));
        self
    }

    pub fn add_analyzer(&mut self, analyzer: Box<dyn MemoryAliasAnalyzer>) {
        self.analyzers.push(analyzer);
    }

    /// Build the graph of a single basic block.
    pub fn build(
        &self,
        name: impl Into<String>,
        block: &BasicBlock,
        live_out: &[RegRef],
    ) -> Result<Ddg<'a>, ScheduleError> {
        let mut ddg = Ddg::new(name, self.machine, self.registry, self.options.antidependence_level);
        let bb = BlockId::from_u32(0);
        let pos = self.build_block(&mut ddg, bb, block, live_out)?;
        self.add_memory_edges(&mut ddg, &pos, false)?;
        Ok(ddg)
    }

    /// Build the graph of a single-block loop body, with one-iteration
    /// loop-carried edges closing the register, memory and FU-state
    /// dependences around the back edge.
    pub fn build_loop(
        &self,
        name: impl Into<String>,
        block: &BasicBlock,
        live_out: &[RegRef],
    ) -> Result<Ddg<'a>, ScheduleError> {
        let mut ddg = Ddg::new(name, self.machine, self.registry, self.options.antidependence_level);
        let bb = BlockId::from_u32(0);
        let pos = self.build_block(&mut ddg, bb, block, live_out)?;
        self.add_loop_register_edges(&mut ddg, bb)?;
        self.add_memory_edges(&mut ddg, &pos, true)?;
        Ok(ddg)
    }

    /// Build one graph spanning a whole control flow graph, wiring
    /// cross-block register dependences through reaching definitions.
    pub fn build_cfg(
        &self,
        name: impl Into<String>,
        cfg: &ControlFlowGraph,
        live_out: &[(BlockId, RegRef)],
    ) -> Result<Ddg<'a>, ScheduleError> {
        let mut ddg = Ddg::new(name, self.machine, self.registry, self.options.antidependence_level);
        let mut all_pos = Vec::new();
        for (bb, block) in cfg.blocks() {
            let outs: Vec<RegRef> = live_out
                .iter()
                .filter(|(b, _)| *b == bb)
                .map(|(_, r)| *r)
                .collect();
            let pos = self.build_block(&mut ddg, bb, block, &outs)?;
            all_pos.extend(pos);
        }
        self.wire_cross_block(&mut ddg, cfg)?;
        self.add_memory_edges(&mut ddg, &all_pos, false)?;
        Ok(ddg)
    }

    // ------------------------------------------------------------------

    /// Create the nodes, program operations, and intra-block register /
    /// operation / FU-state edges of one block. Returns the memory
    /// operations in program order.
    fn build_block(
        &self,
        ddg: &mut Ddg<'a>,
        bb: BlockId,
        block: &BasicBlock,
        live_out: &[RegRef],
    ) -> Result<Vec<PoId>, ScheduleError> {
        let mut groups: FxHashMap<u32, PoId> = FxHashMap::default();
        let mut nodes: Vec<MoveNodeId> = Vec::with_capacity(block.len());

        for bm in block.moves() {
            let node = ddg.add_move(bm.mov.clone(), bb);
            nodes.push(node);
            if let Some(group) = bm.group {
                let po = *groups.entry(group).or_insert_with(|| {
                    let op = match (&bm.mov.destination, &bm.mov.source) {
                        (Terminal::FuPort { op, .. }, _) => *op,
                        (_, Terminal::FuPort { op, .. }) => *op,
                        _ => unreachable!("grouped move without an FU port terminal"),
                    };
                    ddg.add_po(ProgramOperation::new(op))
                });
                if bm.mov.destination.is_fu_port() {
                    ddg.store_mut().po_mut(po).inputs.push(node);
                    ddg.store_mut().node_mut(node).dest_ops.push(po);
                }
                if bm.mov.source.is_fu_port() {
                    ddg.store_mut().po_mut(po).outputs.push(node);
                    ddg.store_mut().node_mut(node).source_op = Some(po);
                }
            }
        }

        self.wire_register_edges(ddg, bb, &nodes, live_out)?;
        self.wire_operation_edges(ddg, &groups)?;
        self.wire_fu_state_edges(ddg, &groups, false)?;

        let mut mem_pos: Vec<PoId> = groups
            .values()
            .copied()
            .filter(|po| self.registry.get(ddg.store().po(*po).op).accesses_memory())
            .collect();
        mem_pos.sort_unstable();
        Ok(mem_pos)
    }

    fn antideps_enabled(&self) -> bool {
        self.options.antidependence_level >= AntidependenceLevel::IntraBlock
    }

    fn wire_register_edges(
        &self,
        ddg: &mut Ddg<'a>,
        bb: BlockId,
        nodes: &[MoveNodeId],
        live_out: &[RegRef],
    ) -> Result<(), ScheduleError> {
        let mut regs: BTreeMap<RegRef, RegState> = BTreeMap::new();
        // The return address behaves like one more register.
        let ra = RegRef {
            rf: ttac_machine::RfId::from_u32(u32::MAX - 1),
            index: u16::MAX,
        };

        for &node in nodes {
            let mov = ddg.store().node(node).mov.clone();

            // Reads: plain source, guard source.
            let mut reads: SmallVec<[(RegRef, bool); 2]> = SmallVec::new();
            if let Some(r) = mov.source.as_register() {
                reads.push((r, false));
            } else if mov.source.is_return_address() {
                reads.push((ra, false));
            }
            if let Some(g) = mov.guard {
                if let Some(r) = g.guard_register() {
                    reads.push((r, true));
                }
            }
            for (reg, is_guard) in reads {
                let kind = if reg == ra { EdgeKind::ReturnAddress } else { EdgeKind::Register };
                let state = regs.entry(reg).or_default();
                let writers = state.last_writes.clone();
                let seen_write = state.seen_write;
                state.reads_since_write.push(node);
                for w in writers {
                    let mut edge = DataDependenceEdge::new(kind, DepType::Raw);
                    edge.data = Some(EdgeData::Register(reg));
                    if is_guard {
                        edge.flags |= EdgeFlags::GUARD;
                    }
                    ddg.add_edge(w, node, edge)?;
                }
                ddg.live_range_mut(bb).record_use(reg, node, seen_write);
            }

            // Writes: plain destination.
            let write_reg = if let Some(r) = mov.destination.as_register() {
                Some((r, EdgeKind::Register))
            } else if mov.destination.is_return_address() {
                Some((ra, EdgeKind::ReturnAddress))
            } else {
                None
            };
            if let Some((reg, kind)) = write_reg {
                let state = regs.entry(reg).or_default();
                let readers = state.reads_since_write.clone();
                let writers = state.last_writes.clone();
                let first_write = !state.seen_write;
                if self.antideps_enabled() {
                    for r in readers {
                        if r == node {
                            continue;
                        }
                        let mut edge = DataDependenceEdge::new(kind, DepType::War);
                        edge.data = Some(EdgeData::Register(reg));
                        ddg.add_edge(r, node, edge)?;
                    }
                    for w in writers {
                        let mut edge = DataDependenceEdge::new(kind, DepType::Waw);
                        edge.data = Some(EdgeData::Register(reg));
                        ddg.add_edge(w, node, edge)?;
                    }
                }
                let state = regs.entry(reg).or_default();
                if mov.is_unconditional() {
                    state.last_writes.clear();
                }
                state.last_writes.push(node);
                state.reads_since_write.clear();
                state.seen_write = true;
                let lr = ddg.live_range_mut(bb);
                if mov.is_unconditional() {
                    lr.record_kill(reg, node);
                    lr.record_define(reg, node, first_write);
                } else {
                    lr.record_define(reg, node, first_write);
                }
            }
        }

        let lr = ddg.live_range_mut(bb);
        for reg in live_out {
            lr.registers_used_after.insert(*reg);
        }
        Ok(())
    }

    fn wire_operation_edges(
        &self,
        ddg: &mut Ddg<'a>,
        groups: &FxHashMap<u32, PoId>,
    ) -> Result<(), ScheduleError> {
        let mut pos: Vec<PoId> = groups.values().copied().collect();
        pos.sort_unstable();
        for po in pos {
            let op = ddg.store().po(po).op;
            let desc = self.registry.get(op);
            let trig_operand = self.machine.trigger_operand(op).unwrap_or(desc.inputs);
            let Some(trigger) = ddg.store().input_for_operand(po, trig_operand) else {
                return Err(ScheduleError::invalid_machine(
                    desc.name.clone(),
                    "operation instance has no trigger operand move",
                ));
            };
            let inputs: Vec<MoveNodeId> = ddg.store().po(po).inputs.to_vec();
            let outputs: Vec<MoveNodeId> = ddg.store().po(po).outputs.to_vec();
            for input in inputs {
                if input != trigger {
                    ddg.add_edge(
                        input,
                        trigger,
                        DataDependenceEdge::new(EdgeKind::Operation, DepType::Trigger),
                    )?;
                }
            }
            for output in outputs {
                ddg.add_edge(
                    trigger,
                    output,
                    DataDependenceEdge::new(EdgeKind::Operation, DepType::Raw),
                )?;
            }
        }
        Ok(())
    }

    fn wire_fu_state_edges(
        &self,
        ddg: &mut Ddg<'a>,
        groups: &FxHashMap<u32, PoId>,
        loop_carried: bool,
    ) -> Result<(), ScheduleError> {
        let mut effectful: Vec<PoId> = groups
            .values()
            .copied()
            .filter(|po| self.registry.get(ddg.store().po(*po).op).side_effects)
            .collect();
        effectful.sort_unstable();
        let triggers: Vec<MoveNodeId> = effectful
            .iter()
            .filter_map(|po| ddg.store().trigger_input(*po, self.machine))
            .collect();
        for pair in triggers.windows(2) {
            ddg.add_edge(
                pair[0],
                pair[1],
                DataDependenceEdge::new(EdgeKind::FuState, DepType::Unknown),
            )?;
        }
        if loop_carried {
            if let (Some(first), Some(last)) = (triggers.first(), triggers.last()) {
                ddg.add_edge(
                    *last,
                    *first,
                    DataDependenceEdge::new(EdgeKind::FuState, DepType::Unknown)
                        .with_loop_distance(1),
                )?;
            }
        }
        Ok(())
    }

    /// One-iteration loop-carried register edges of a single-block loop.
    fn add_loop_register_edges(&self, ddg: &mut Ddg<'a>, bb: BlockId) -> Result<(), ScheduleError> {
        let lr = ddg.live_range(bb).cloned().unwrap_or_default();
        let loop_antideps =
            self.options.antidependence_level >= AntidependenceLevel::SingleBlockLoop;
        for (reg, first_uses) in &lr.reg_first_uses {
            if let Some(defines) = lr.reg_defines.get(reg) {
                for def in defines {
                    for fu in first_uses {
                        let mut edge = DataDependenceEdge::register(DepType::Raw, *reg)
                            .with_loop_distance(1);
                        edge.flags |= guard_flag(ddg, *fu, *reg);
                        ddg.add_edge(*def, *fu, edge)?;
                    }
                }
            }
        }
        if loop_antideps {
            for (reg, first_defines) in &lr.reg_first_defines {
                if let Some(last_uses) = lr.reg_last_uses.get(reg) {
                    for lu in last_uses {
                        for fd in first_defines {
                            let edge = DataDependenceEdge::register(DepType::War, *reg)
                                .with_loop_distance(1);
                            ddg.add_edge(*lu, *fd, edge)?;
                        }
                    }
                }
                if let Some(defines) = lr.reg_defines.get(reg) {
                    // A write against its own next instance is a real WAW
                    // under II overlap, so self edges are installed too.
                    for def in defines {
                        for fd in first_defines {
                            let edge = DataDependenceEdge::register(DepType::Waw, *reg)
                                .with_loop_distance(1);
                            ddg.add_edge(*def, *fd, edge)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Reaching-definition propagation and cross-block RAW/WAR/WAW wiring.
    fn wire_cross_block(&self, ddg: &mut Ddg<'a>, cfg: &ControlFlowGraph) -> Result<(), ScheduleError> {
        type Reaches = BTreeMap<BlockId, BTreeMap<RegRef, Vec<(MoveNodeId, u8)>>>;
        let mut reaches: Reaches = BTreeMap::new();
        let blocks: Vec<BlockId> = cfg.blocks().map(|(id, _)| id).collect();
        for bb in &blocks {
            reaches.insert(*bb, BTreeMap::new());
        }

        // Propagate definitions to a fixpoint. Distances saturate: reaching
        // a block over n back edges is recorded as distance n, capped.
        let mut changed = true;
        while changed {
            changed = false;
            for &to in &blocks {
                for (from, kind) in cfg.predecessors(to).collect::<Vec<_>>() {
                    let hop = if kind == CfgEdgeKind::LoopBack { 1u8 } else { 0 };
                    let mut incoming: Vec<(RegRef, MoveNodeId, u8)> = Vec::new();
                    if let Some(lr) = ddg.live_range(from) {
                        for (reg, defs) in &lr.reg_defines {
                            for d in defs {
                                incoming.push((*reg, *d, hop));
                            }
                        }
                        let killed: Vec<RegRef> = lr.reg_defines.keys().copied().collect();
                        for (reg, defs) in &reaches[&from].clone() {
                            if killed.contains(reg) {
                                continue;
                            }
                            for (d, dist) in defs {
                                incoming.push((*reg, *d, dist.saturating_add(hop)));
                            }
                        }
                    }
                    let to_map = reaches.get_mut(&to).unwrap();
                    for (reg, node, dist) in incoming {
                        let entry = to_map.entry(reg).or_default();
                        if !entry.iter().any(|(n, d)| *n == node && *d <= dist) {
                            entry.retain(|(n, d)| !(*n == node && *d > dist));
                            entry.push((node, dist));
                            changed = true;
                        }
                    }
                }
            }
        }

        // RAW edges from reaching definitions to first uses; WAW/WAR to
        // first defines when full antidependences are requested.
        let all_antideps = self.options.antidependence_level >= AntidependenceLevel::All;
        for &bb in &blocks {
            let lr = match ddg.live_range(bb) {
                Some(lr) => lr.clone(),
                None => continue,
            };
            // Record the reach-in sets for later consumers.
            ddg.live_range_mut(bb).reg_def_reaches = reaches[&bb].clone();
            for (reg, uses) in &lr.reg_first_uses {
                if let Some(defs) = reaches[&bb].get(reg) {
                    for (def, dist) in defs {
                        for u in uses {
                            let mut edge = DataDependenceEdge::register(DepType::Raw, *reg)
                                .with_loop_distance(*dist);
                            edge.flags |= guard_flag(ddg, *u, *reg);
                            ddg.add_edge(*def, *u, edge)?;
                        }
                    }
                }
            }
            if all_antideps {
                for (reg, first_defs) in &lr.reg_first_defines {
                    if let Some(defs) = reaches[&bb].get(reg) {
                        for (def, dist) in defs {
                            for fd in first_defs {
                                if def == fd {
                                    continue;
                                }
                                let edge = DataDependenceEdge::register(DepType::Waw, *reg)
                                    .with_loop_distance(*dist);
                                ddg.add_edge(*def, *fd, edge)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Pairwise alias queries and memory edge installation.
    ///
    /// `loop_carried` additionally closes the cross-iteration pairs with
    /// distance-1 back edges, including an operation against its own next
    /// instance.
    fn add_memory_edges(
        &self,
        ddg: &mut Ddg<'a>,
        mem_pos: &[PoId],
        loop_carried: bool,
    ) -> Result<(), ScheduleError> {
        for (i, &a) in mem_pos.iter().enumerate() {
            for &b in &mem_pos[i + 1..] {
                self.memory_edge_between(ddg, a, b, EdgeSpan::Intra, 0)?;
            }
        }
        if loop_carried {
            for &a in mem_pos {
                for &b in mem_pos {
                    self.memory_edge_between(ddg, a, b, EdgeSpan::LoopCarried, 1)?;
                }
            }
        }
        Ok(())
    }

    fn memory_edge_between(
        &self,
        ddg: &mut Ddg<'a>,
        a: PoId,
        b: PoId,
        span: EdgeSpan,
        distance: u8,
    ) -> Result<(), ScheduleError> {
        let (a_writes, b_writes) = {
            let da = self.registry.get(ddg.store().po(a).op);
            let db = self.registry.get(ddg.store().po(b).op);
            (da.writes_memory, db.writes_memory)
        };
        let dep = match (a_writes, b_writes) {
            (true, false) => DepType::Raw,
            (false, true) => DepType::War,
            (true, true) => DepType::Waw,
            (false, false) => return Ok(()),
        };
        let mut result = AliasingResult::Unknown;
        for analyzer in &self.analyzers {
            match analyzer.analyze(ddg, a, b, span) {
                AliasingResult::Unknown => continue,
                definite => {
                    log::trace!(
                        target: "ddg:alias",
                        "{} says {definite:?} for {a} vs {b} ({span:?})",
                        analyzer.name()
                    );
                    result = definite;
                    break;
                }
            }
        }
        if result == AliasingResult::False {
            return Ok(());
        }
        let (Some(ta), Some(tb)) = (
            ddg.store().trigger_input(a, self.machine),
            ddg.store().trigger_input(b, self.machine),
        ) else {
            return Ok(());
        };
        if ta == tb && distance == 0 {
            return Ok(());
        }
        let mut edge = DataDependenceEdge::new(EdgeKind::Memory, dep).with_loop_distance(distance);
        edge.data = Some(EdgeData::Memory("mem".into()));
        if result == AliasingResult::True {
            edge.flags |= EdgeFlags::CERTAIN_ALIAS;
        }
        ddg.add_edge(ta, tb, edge)?;
        Ok(())
    }
}

/// GUARD flag when `node` reads `reg` only through its guard.
fn guard_flag(ddg: &Ddg<'_>, node: MoveNodeId, reg: RegRef) -> EdgeFlags {
    let mov = &ddg.store().node(node).mov;
    let guard_reads = mov
        .guard
        .and_then(|g| g.guard_register())
        .is_some_and(|g| g == reg);
    if guard_reads && mov.source.as_register() != Some(reg) {
        EdgeFlags::GUARD
    } else {
        EdgeFlags::empty()
    }
}

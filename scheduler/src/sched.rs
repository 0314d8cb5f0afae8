use std::collections::{BTreeMap, BTreeSet};

use ttac_ddg::Ddg;
use ttac_machine::{FuId, Machine, OperationRegistry, PortId, RfKind};
use ttac_program::{InstructionStream, MoveGuard, MoveNodeId, NodeFlags, Terminal};
use ttac_resources::{AssignOpts, ResourceConstraintAnalyzer, ResourceManager};
use ttac_session::{LoopSchedulingMode, ScheduleError, SchedulerOptions, PROLOG_CYCLE_BIAS};

use crate::{
    duplicator::MoveNodeDuplicator,
    reversible::{Reversible, TransformKind},
    selector::BuSelector,
    transforms::front::ScheduleFront,
};

/// Extra bias distinguishing epilog copies from prolog copies inside the
/// prolog resource manager's image.
pub(crate) const EPILOG_EXTRA_BIAS: i32 = 2 * 512;

/// A finished basic-block schedule.
#[derive(Debug)]
pub struct BlockSchedule<'a> {
    pub stream: InstructionStream,
    pub ddg: Ddg<'a>,
    pub rm: ResourceManager<'a>,
}

/// A finished software-pipelined loop schedule.
pub struct LoopSchedule<'a> {
    pub stream: InstructionStream,
    pub ii: u32,
    pub overlap_count: u32,
    pub ddg: Ddg<'a>,
}

/// The Bubblefish instruction scheduler: bottom-up, breadth-first over
/// scheduling fronts, interleaving placement with reversible local
/// transformations.
pub struct Bf2Scheduler<'a> {
    pub(crate) machine: &'a Machine,
    pub(crate) registry: &'a OperationRegistry,
    pub(crate) options: &'a SchedulerOptions,
    pub(crate) ddg: Ddg<'a>,
    pub(crate) rm: ResourceManager<'a>,
    pub(crate) prolog_rm: Option<ResourceManager<'a>>,
    pub(crate) duplicator: Option<MoveNodeDuplicator<'a>>,
    pub(crate) selector: BuSelector,
    /// Largest cycle any move may currently take.
    pub(crate) latest_cycle: i32,
    pub(crate) ii: u32,
    pub(crate) trip_count: u32,
    pub(crate) loop_mode: LoopSchedulingMode,
    /// Results proven dead; their writes are gone from the graph.
    pub(crate) dead_results: BTreeSet<MoveNodeId>,
    /// Loop-invariant operand writes hoisted before the loop.
    pub(crate) pre_shared: BTreeMap<MoveNodeId, (FuId, PortId)>,
    /// Nodes whose multi-destination operand share proved unschedulable.
    pub(crate) illegal_operand_shares: BTreeSet<MoveNodeId>,
    /// (source, destination) bypasses that must not be retried.
    pub(crate) forbidden_bypass: BTreeSet<(MoveNodeId, MoveNodeId)>,
    /// Destination -> producer of every bypass currently in effect.
    pub(crate) bypass_map: BTreeMap<MoveNodeId, MoveNodeId>,
    pub(crate) jump_node: Option<MoveNodeId>,
    pub(crate) jump_guard_write: Option<MoveNodeId>,
    /// Applied scheduling fronts, undone in reverse on full rollback.
    stack: Vec<Reversible>,
}

impl<'a> Bf2Scheduler<'a> {
    pub fn new(ddg: Ddg<'a>, rm: ResourceManager<'a>, options: &'a SchedulerOptions) -> Self {
        let machine = ddg.machine();
        let registry = ddg.registry();
        Self {
            machine,
            registry,
            options,
            ddg,
            rm,
            prolog_rm: None,
            duplicator: None,
            selector: BuSelector::new(),
            latest_cycle: 0,
            ii: 0,
            trip_count: 0,
            loop_mode: LoopSchedulingMode::NO_LOOP_SCHEDULER,
            dead_results: BTreeSet::new(),
            pre_shared: BTreeMap::new(),
            illegal_operand_shares: BTreeSet::new(),
            forbidden_bypass: BTreeSet::new(),
            bypass_map: BTreeMap::new(),
            jump_node: None,
            jump_guard_write: None,
            stack: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Queries shared by the transformations

    pub(crate) fn is_dead_result(&self, node: MoveNodeId) -> bool {
        self.dead_results.contains(&node)
    }

    pub(crate) fn is_pre_loop_shared(&self, node: MoveNodeId) -> bool {
        self.pre_shared.contains_key(&node)
    }

    pub(crate) fn delay_slots(&self) -> i32 {
        self.machine.control_unit().delay_slots as i32
    }

    pub(crate) fn is_control_flow_move(&self, node: MoveNodeId) -> bool {
        self.ddg.store().node(node).mov.is_control_flow(self.registry)
    }

    /// The guard predicating the loop's jump, if the jump is guarded.
    pub(crate) fn jump_guard(&self) -> Option<MoveGuard> {
        self.jump_node.and_then(|j| self.ddg.store().node(j).mov.guard)
    }

    /// Whether `node` writes the register the jump guard reads.
    pub(crate) fn writes_jump_guard(&self, node: MoveNodeId) -> bool {
        let Some(guard) = self.jump_guard() else {
            return false;
        };
        let Some(guard_reg) = guard.guard_register() else {
            return false;
        };
        self.ddg.store().node(node).mov.destination.as_register() == Some(guard_reg)
    }

    /// The trigger node of a destination operation of `node`, when the
    /// machine makes that operand unambiguous.
    pub(crate) fn sister_trigger(&self, node: MoveNodeId) -> Option<MoveNodeId> {
        let store = self.ddg.store();
        let po = store.node(node).dest_ops.first().copied()?;
        store.trigger_input(po, self.machine)
    }

    pub(crate) fn has_unscheduled_successors(&self, node: MoveNodeId) -> bool {
        self.ddg.out_edges(node).any(|(_, rec)| {
            if rec.edge.is_back_edge() {
                return false;
            }
            let head = self.ddg.store().node(rec.head);
            !head.is_scheduled() && !head.is_dropped() && !self.is_dead_result(rec.head)
        })
    }

    /// Whether moves touching the universal register file force `node` and
    /// `other` into one front.
    pub(crate) fn universal_coupled(&self, node: MoveNodeId) -> Vec<MoveNodeId> {
        let store = self.ddg.store();
        let mut coupled = Vec::new();
        let n = store.node(node);
        let universal = |t: &Terminal| {
            t.as_register()
                .is_some_and(|r| self.machine.rf(r.rf).kind == RfKind::Universal)
        };
        if universal(&n.mov.source) {
            if let Some(p) = self.ddg.only_register_raw_source(node, false, 0) {
                coupled.push(p);
            }
        }
        if universal(&n.mov.destination) {
            coupled.extend(self.ddg.register_raw_destinations(node, true, false));
        }
        coupled
    }

    /// Whether a prolog copy accompanies assignments of this node.
    pub(crate) fn use_prolog_move(&self, node: MoveNodeId) -> bool {
        if self.prolog_rm.is_none() || self.ii == 0 {
            return false;
        }
        if Some(node) == self.jump_node {
            return false;
        }
        if self.is_pre_loop_shared(node) {
            return false;
        }
        if self.loop_mode.only_speculated_prolog_moves() {
            return self.can_be_speculated(node);
        }
        true
    }

    /// A move is speculatable when executing it one extra time cannot be
    /// observed: no memory write, no side effects, no control flow.
    pub(crate) fn can_be_speculated(&self, node: MoveNodeId) -> bool {
        let store = self.ddg.store();
        let n = store.node(node);
        for po in n.dest_ops.iter().chain(n.source_op.iter()) {
            let desc = self.registry.get(store.po(*po).op);
            if desc.writes_memory || desc.side_effects || desc.control_flow {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Assignment wrappers handling the prolog mirror

    /// Place a move, mirroring it into the prolog image when loop
    /// scheduling asked for prolog materialization.
    ///
    /// Returns the prolog copy when one was created.
    pub(crate) fn assign_move(
        &mut self,
        cycle: i32,
        node: MoveNodeId,
        opts: AssignOpts,
    ) -> Result<Option<MoveNodeId>, ScheduleError> {
        self.rm.assign(cycle, &mut self.ddg, node, opts)?;
        if !self.use_prolog_move(node) {
            return Ok(None);
        }
        let guard = if self.loop_mode.predicates_prolog_moves() {
            self.jump_guard()
        } else {
            None
        };
        let duplicator = self.duplicator.as_mut().expect("prolog rm without duplicator");
        let (copy, _created) = duplicator.duplicate(&self.ddg, node, guard);
        let prolog_rm = self.prolog_rm.as_mut().expect("checked above");
        let prolog_cycle = PROLOG_CYCLE_BIAS + cycle;
        let prolog_opts = AssignOpts {
            bus: opts.prolog_bus,
            imm_write_cycle: opts.prolog_imm_write_cycle,
            ..AssignOpts::default()
        };
        match prolog_rm.assign(prolog_cycle, duplicator.prolog_ddg_mut(), copy, prolog_opts) {
            Ok(()) => Ok(Some(copy)),
            Err(e) => {
                // Keep assign atomic: the body booking is taken back.
                duplicator.dispose(node);
                self.rm.unassign(&mut self.ddg, node)?;
                Err(e)
            }
        }
    }

    pub(crate) fn unassign_move(
        &mut self,
        node: MoveNodeId,
        dispose_prolog_copy: bool,
    ) -> Result<(), ScheduleError> {
        if let (Some(duplicator), Some(prolog_rm)) =
            (self.duplicator.as_mut(), self.prolog_rm.as_mut())
        {
            if let Some(copy) = duplicator.get(node) {
                if prolog_rm.is_assigned(copy) {
                    prolog_rm.unassign(duplicator.prolog_ddg_mut(), copy)?;
                }
                if dispose_prolog_copy {
                    duplicator.dispose(node);
                }
            }
        }
        self.rm.unassign(&mut self.ddg, node)
    }

    // ------------------------------------------------------------------
    // Basic block scheduling

    /// Every operation of the region must have an implementing unit; a
    /// machine that cannot execute the program is reported before any
    /// partial schedule exists.
    fn check_operations(&self) -> Result<(), ScheduleError> {
        for (_, po) in self.ddg.store().pos() {
            if !self.machine.supports(po.op) {
                return Err(ScheduleError::invalid_machine(
                    self.registry.get(po.op).name.clone(),
                    "no function unit implements this operation",
                ));
            }
        }
        Ok(())
    }

    /// Schedule a basic block's graph to completion.
    pub fn schedule_ddg(mut self) -> Result<BlockSchedule<'a>, ScheduleError> {
        self.check_operations()?;
        // Leave room above the critical path for resource conflicts.
        self.ddg.set_edge_weight_heuristics(ttac_ddg::EdgeWeightHeuristics::Real);
        let slack = (self.ddg.node_count() as i32 / self.machine.bus_count().max(1) as i32) + 4;
        self.latest_cycle = self.ddg.height() + slack + self.delay_slots();
        self.ddg.set_edge_weight_heuristics(ttac_ddg::EdgeWeightHeuristics::Heuristic);
        self.find_jump();
        self.run_fronts()?;
        if self.options.postpass_optimization {
            self.run_postpass();
        }
        self.finalize();
        let stream = self.rm.instructions(&self.ddg);
        let Bf2Scheduler { ddg, rm, .. } = self;
        Ok(BlockSchedule { stream, ddg, rm })
    }

    // ------------------------------------------------------------------
    // Loop scheduling

    /// Software-pipeline a single-block loop: ascending initiation
    /// intervals, pre-loop operand sharing first, plain retry second.
    pub fn schedule_loop_ddg(mut self, trip_count: u32) -> Result<LoopSchedule<'a>, ScheduleError> {
        self.check_operations()?;
        self.trip_count = trip_count;
        self.find_jump();
        self.loop_mode = self.select_loop_scheduling_mode();
        let min_ii = self.minimum_initiation_interval();
        let mut last_error = None;

        for ii in min_ii..=self.options.max_initiation_interval {
            for try_pre_share in [true, false] {
                self.prepare_loop_attempt(ii);
                if try_pre_share {
                    self.allocate_pre_loop_shares();
                    if self.pre_shared.is_empty() {
                        // Nothing to share; the plain attempt is the same.
                        continue;
                    }
                }
                log::debug!(
                    target: "scheduler:loop",
                    "trying ii {ii} (pre-share: {})",
                    !self.pre_shared.is_empty()
                );
                match self.run_fronts() {
                    Ok(()) => {
                        let smallest = self.rm.smallest_cycle().unwrap_or(0);
                        let largest = self.rm.largest_cycle().unwrap_or(0);
                        let overlap_count = ((largest - smallest) as u32) / ii;
                        if trip_count > 0 && overlap_count >= trip_count {
                            log::debug!(
                                target: "scheduler:loop",
                                "ii {ii}: overlap {overlap_count} >= trip count {trip_count}, rejecting"
                            );
                            self.rollback_attempt();
                            continue;
                        }
                        self.finalize();
                        let stream = self.emit_loop_stream();
                        let Bf2Scheduler { ddg, .. } = self;
                        return Ok(LoopSchedule {
                            stream,
                            ii,
                            overlap_count,
                            ddg,
                        });
                    }
                    Err(e) => {
                        log::debug!(target: "scheduler:loop", "ii {ii} failed: {e}");
                        last_error = Some(e);
                        self.rollback_attempt();
                    }
                }
            }
        }
        Err(last_error.unwrap_or(ScheduleError::SchedulingFailure { node: 0, limit: None }))
    }

    fn prepare_loop_attempt(&mut self, ii: u32) {
        self.ii = ii;
        self.latest_cycle = 2 * ii as i32 - 1;
        self.rm = ResourceManager::new(self.machine, self.registry).with_initiation_interval(ii);
        self.prolog_rm = Some(ResourceManager::new(self.machine, self.registry));
        self.duplicator = Some(MoveNodeDuplicator::new(self.machine, self.registry));
        self.pre_shared.clear();
        self.illegal_operand_shares.clear();
        self.forbidden_bypass.clear();
    }

    fn rollback_attempt(&mut self) {
        while let Some(front) = self.stack.pop() {
            front.undo(self);
        }
        self.pre_shared.clear();
        debug_assert_eq!(self.rm.assigned_node_count(), 0);
        debug_assert!(self.dead_results.is_empty());
        debug_assert!(self.bypass_map.is_empty());
    }

    /// Mode selection: the configured mode, except that a loop whose jump
    /// is unguarded cannot predicate its prolog moves and falls back to
    /// pure speculation.
    fn select_loop_scheduling_mode(&self) -> LoopSchedulingMode {
        let mode = self.options.loop_scheduling;
        if mode.predicates_prolog_moves() && self.jump_guard().is_none() {
            return LoopSchedulingMode::ENABLE_LOOP_SCHEDULER;
        }
        mode
    }

    fn minimum_initiation_interval(&self) -> u32 {
        let moves = self.ddg.node_count().max(1) as u32;
        let buses = self.machine.bus_count().max(1) as u32;
        let res_mii = moves.div_ceil(buses);
        let mut rec_mii = 1;
        for (_, rec) in self.ddg.edge_records() {
            if rec.edge.is_back_edge() {
                let lat = self.ddg.edge_latency(rec, 0).max(1) as u32;
                rec_mii = rec_mii.max(lat.div_ceil(rec.edge.loop_distance as u32));
            }
        }
        res_mii.max(rec_mii).max(1)
    }

    fn find_jump(&mut self) {
        self.jump_node = self
            .ddg
            .nodes()
            .find(|n| self.is_control_flow_move(*n));
        self.jump_guard_write = self.jump_node.and_then(|j| self.ddg.only_guard_def(j));
    }

    // ------------------------------------------------------------------
    // The front loop

    fn run_fronts(&mut self) -> Result<(), ScheduleError> {
        let dead = self.dead_results.clone();
        self.selector.initialize(&self.ddg, |n| dead.contains(&n));
        loop {
            let Some(candidate) = self.selector.select(&self.ddg) else {
                break;
            };
            if self.ddg.store().node(candidate).is_scheduled()
                || self.is_dead_result(candidate)
                || self.is_pre_loop_shared(candidate)
            {
                continue;
            }
            let mut front =
                Reversible::new(TransformKind::ScheduleFront(ScheduleFront::new(candidate)));
            if front.apply(self) {
                self.stack.push(front);
            } else {
                let limit = ResourceConstraintAnalyzer::analyze(
                    &self.rm,
                    &self.ddg,
                    candidate,
                    self.rm.smallest_cycle().unwrap_or(0),
                    self.latest_cycle,
                );
                return Err(ScheduleError::SchedulingFailure {
                    node: candidate.as_u32(),
                    limit: Some(limit),
                });
            }
        }
        // Everything must now be placed or accounted for.
        for node in self.ddg.nodes().collect::<Vec<_>>() {
            let n = self.ddg.store().node(node);
            if !n.is_scheduled() && !self.is_dead_result(node) && !self.is_pre_loop_shared(node) {
                return Err(ScheduleError::SchedulingFailure {
                    node: node.as_u32(),
                    limit: None,
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Post-pass optimization

    /// After the block is fully scheduled, retry bypasses that are legal
    /// under full visibility and kill results they orphan.
    fn run_postpass(&mut self) {
        let mut producers: Vec<MoveNodeId> = self
            .ddg
            .nodes()
            .filter(|n| {
                let node = self.ddg.store().node(*n);
                node.is_scheduled()
                    && node.source_op.is_some()
                    && node.mov.destination.is_register()
            })
            .collect();
        producers.sort_unstable_by_key(|n| (self.ddg.store().node(*n).cycle(), *n));
        for producer in producers {
            let consumers = self.ddg.register_raw_destinations(producer, false, false);
            let mut kinds = Vec::new();
            for consumer in consumers {
                if !self.ddg.store().node(consumer).is_scheduled() {
                    continue;
                }
                kinds.push(TransformKind::LateBypass(
                    crate::transforms::bypass::LateBypass::postpass(producer, consumer),
                ));
            }
            let mut all_ok = !kinds.is_empty();
            let mut children = Vec::new();
            for kind in kinds {
                if !crate::reversible::run_child(&mut children, kind, self) {
                    all_ok = false;
                }
            }
            if all_ok && self.options.kill_dead_results && !self.ddg.result_used(producer) {
                let _ = crate::reversible::run_child(
                    &mut children,
                    TransformKind::DreLate(crate::transforms::dre::DreLate::new(producer)),
                    self,
                );
            }
            // Whatever succeeded stays applied.
            self.stack.append(&mut children);
        }

        // Register guards whose defining comparison sits on a guardable FU
        // port lose the register round-trip.
        let guarded: Vec<MoveNodeId> = self
            .ddg
            .nodes()
            .filter(|n| {
                let node = self.ddg.store().node(*n);
                node.is_scheduled() && node.mov.guard.is_some()
            })
            .collect();
        for node in guarded {
            let mut children = Vec::new();
            let _ = crate::reversible::run_child(
                &mut children,
                TransformKind::GuardConversion(crate::transforms::bypass::GuardConversion::new(
                    node,
                )),
                self,
            );
            self.stack.append(&mut children);
        }
    }

    // ------------------------------------------------------------------
    // Pre-loop operand sharing

    /// Dedicate FU ports to loop-invariant operand values: the operand
    /// write then happens once before the loop instead of every iteration.
    fn allocate_pre_loop_shares(&mut self) {
        if self.prolog_rm.is_none() {
            return;
        }
        let store = self.ddg.store();
        let mut per_port: BTreeMap<(u32, u8), BTreeSet<MoveNodeId>> = BTreeMap::new();
        for (_, po) in store.pos() {
            let desc = self.registry.get(po.op);
            let trig = self.machine.trigger_operand(po.op).unwrap_or(desc.inputs);
            for &input in po.inputs.iter() {
                let n = store.node(input);
                let Some(operand) = n.mov.destination.operation_index() else {
                    continue;
                };
                if operand == trig || !n.mov.is_unconditional() {
                    continue;
                }
                // Invariant: the source register has no writer in the loop.
                let invariant = n.mov.source.is_register()
                    && self.ddg.only_register_raw_source(input, false, 1).is_none()
                    && self
                        .ddg
                        .in_edges(input)
                        .all(|(_, rec)| rec.edge.dep != ttac_ddg::DepType::Raw);
                if invariant {
                    per_port
                        .entry((po.op.as_u32(), operand))
                        .or_default()
                        .insert(input);
                }
            }
        }
        for ((op_raw, operand), nodes) in per_port {
            let op = ttac_machine::OpId::from_u32(op_raw);
            // The port can be dedicated only if every instance of the
            // operation feeds this operand the same invariant value.
            let mut sources = nodes
                .iter()
                .map(|n| self.ddg.store().node(*n).mov.source);
            let Some(first) = sources.next() else { continue };
            if !sources.all(|s| s.same_location(&first)) {
                continue;
            }
            let instance_count = self
                .ddg
                .store()
                .pos()
                .filter(|(_, po)| po.op == op)
                .count();
            if nodes.len() != instance_count {
                continue;
            }
            let Some(fu) = self.machine.fus_implementing(op).next() else {
                continue;
            };
            let Some(port) = self
                .machine
                .fu(fu)
                .hw_operation(op)
                .and_then(|hw| hw.port_of(operand))
            else {
                continue;
            };
            for node in nodes {
                log::debug!(target: "scheduler:preshare", "pre-loop sharing {node} on {fu}");
                self.pre_shared.insert(node, (fu, port));
            }
        }
    }

    // ------------------------------------------------------------------
    // Finalization

    /// Stamp the schedule permanent and verify it in debug builds.
    fn finalize(&mut self) {
        let nodes: Vec<MoveNodeId> = self.ddg.nodes().collect();
        for node in nodes {
            let flags = &mut self.ddg.store_mut().node_mut(node).flags;
            flags.remove(NodeFlags::IN_FRONTIER);
            flags.insert(NodeFlags::FINALIZED);
        }
        if cfg!(debug_assertions) {
            if let Err(e) = self.ddg.sanity_check() {
                panic!("schedule failed verification: {e}");
            }
        }
        self.stack.clear();
    }

    fn emit_loop_stream(&mut self) -> InstructionStream {
        let mut stream = self.rm.instructions(&self.ddg);
        if let (Some(prolog_rm), Some(duplicator)) = (&self.prolog_rm, &self.duplicator) {
            let image = prolog_rm.instructions(duplicator.prolog_ddg());
            for instr in image.prolog {
                if instr.cycle >= EPILOG_EXTRA_BIAS {
                    let mut instr = instr;
                    instr.cycle -= EPILOG_EXTRA_BIAS;
                    stream.epilog.push(instr);
                } else {
                    stream.prolog.push(instr);
                }
            }
        }
        stream
    }

    // ------------------------------------------------------------------
    // Support for the retry ladder

    /// The producer of an earlier bypass that now blocks `node`, if any.
    pub(crate) fn find_revertable_bypass(&self, node: MoveNodeId) -> Option<(MoveNodeId, MoveNodeId)> {
        // A bypass into a sibling of the same operation steals the FU's
        // port bandwidth this node needs; reverting it frees the cycle.
        let store = self.ddg.store();
        for po in store.node(node).dest_ops.iter().chain(store.node(node).source_op.iter()) {
            for sibling in store.po(*po).all_nodes() {
                if let Some(src) = self.bypass_map.get(&sibling) {
                    return Some((*src, sibling));
                }
            }
        }
        None
    }

}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ttac_ddg::DdgBuilder;
    use ttac_machine::{testing, OperationRegistry};
    use ttac_program::{BasicBlock, RegRef, Terminal};

    use super::*;
    use crate::{reversible::Reversible, transforms::front::ScheduleFront};

    /// A front scheduled and then undone leaves the graph and the resource
    /// tables byte-for-byte as they were.
    #[test]
    fn front_apply_undo_is_exact() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let add = registry.expect("add");
        let sub = registry.expect("sub");

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
        let live_out = [RegRef { rf: m.rf, index: 5 }];
        let ddg = builder.build("undo", &bb, &live_out).unwrap();
        let rm = ResourceManager::new(&m.machine, &registry);
        let mut sched = Bf2Scheduler::new(ddg, rm, &options);
        sched.latest_cycle = 20;

        let before = sched.ddg.xml_string();
        let origin = sched
            .ddg
            .nodes()
            .find(|n| !sched.has_unscheduled_successors(*n))
            .unwrap();
        let mut front = Reversible::new(TransformKind::ScheduleFront(ScheduleFront::new(origin)));
        assert!(front.apply(&mut sched));
        assert!(sched.rm.assigned_node_count() > 0);
        assert_ne!(sched.ddg.xml_string(), before);

        front.undo(&mut sched);
        assert_eq!(sched.ddg.xml_string(), before);
        assert_eq!(sched.rm.assigned_node_count(), 0);
        assert!(sched.dead_results.is_empty());
        assert!(sched.bypass_map.is_empty());
        sched.ddg.sanity_check().unwrap();
    }

    /// A failed loop attempt rolls the world back before the next interval
    /// is tried.
    #[test]
    fn loop_rollback_restores_everything() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let options = SchedulerOptions::default();
        let add = registry.expect("add");

        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::reg(m.rf, 0), Terminal::imm(1)],
            &[Terminal::reg(m.rf, 0)],
        );
        let builder = DdgBuilder::new(&m.machine, &registry, &options);
        let live_out = [RegRef { rf: m.rf, index: 0 }];
        let ddg = builder.build_loop("roll", &bb, &live_out).unwrap();
        let rm = ResourceManager::new(&m.machine, &registry);
        let mut sched = Bf2Scheduler::new(ddg, rm, &options);

        let before = sched.ddg.xml_string();
        sched.prepare_loop_attempt(2);
        match sched.run_fronts() {
            Ok(()) | Err(_) => sched.rollback_attempt(),
        }
        assert_eq!(sched.ddg.xml_string(), before);
        assert_eq!(sched.rm.assigned_node_count(), 0);
    }
}

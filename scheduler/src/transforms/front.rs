use std::collections::BTreeSet;

use ttac_program::{MoveNodeId, NodeFlags};

use crate::{
    reversible::{run_child, undo_children, Reversible, TransformKind},
    sched::Bf2Scheduler,
    transforms::{
        dre::DreEarly,
        schedule::{ScheduleBu, ScheduleExact, ScheduleTd},
        share::DropPreShared,
        swap::SwapOperands,
    },
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Direction {
    BottomUp,
    TopDown,
    Exact,
}

#[derive(Debug, Copy, Clone)]
struct Limits {
    direction: Direction,
    earliest: i32,
    latest: i32,
}

/// One scheduling front: the moves that must be placed together because
/// they realize the same operations, share operands, or are coupled
/// through universal registers.
///
/// The front drives the retry ladder for each member; when a member
/// defeats every option, everything scheduled so far is undone and the
/// whole front restarts with a lower cycle ceiling.
pub struct ScheduleFront {
    origin: MoveNodeId,
    members: BTreeSet<MoveNodeId>,
    notify: BTreeSet<MoveNodeId>,
}

impl ScheduleFront {
    pub fn new(origin: MoveNodeId) -> Self {
        Self {
            origin,
            members: BTreeSet::new(),
            notify: BTreeSet::new(),
        }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        _pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let mut latest = sched.latest_cycle;
        self.collect(sched);
        loop {
            let Some(mn) = self.pick(sched, post) else {
                break;
            };
            if sched.is_control_flow_move(mn) {
                latest = latest.min(sched.latest_cycle - sched.delay_slots());
            }
            if self.try_to_schedule_move_outer(sched, post, mn, &mut latest) {
                self.collect(sched);
                continue;
            }
            undo_children(post, sched);
            let smallest = sched.rm.smallest_cycle().unwrap_or(sched.latest_cycle);
            let give_up_below = smallest - (sched.machine.maximum_latency() as i32 + 1);
            if latest < 0 || latest < give_up_below {
                log::debug!(
                    target: "scheduler:front",
                    "retry of {mn} fell below cycle {give_up_below}, front unschedulable"
                );
                self.clear_marks(sched);
                return false;
            }
            // Retry the whole front under the lowered ceiling.
            self.members.clear();
            self.collect(sched);
        }

        // Every member is now placed or accounted for.
        let members: Vec<MoveNodeId> = self.members.iter().copied().collect();
        for m in &members {
            let node = sched.ddg.store().node(*m);
            if node.is_scheduled() {
                let dead = sched.dead_results.clone();
                sched
                    .selector
                    .notify_scheduled(&sched.ddg, *m, |n| dead.contains(&n));
            } else {
                debug_assert!(
                    sched.is_dead_result(*m)
                        || sched.is_pre_loop_shared(*m)
                        || node.is_dropped(),
                    "front left {m} unscheduled"
                );
            }
        }
        let dead = sched.dead_results.clone();
        for n in self.notify.iter().copied().collect::<Vec<_>>() {
            sched.selector.might_be_ready(&sched.ddg, n, &|x| dead.contains(&x));
        }
        self.clear_marks(sched);
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        self.clear_marks(sched);
    }

    // ------------------------------------------------------------------

    /// Gather the transitive must-schedule-together closure of the origin.
    fn collect(&mut self, sched: &mut Bf2Scheduler<'_>) {
        let mut work: Vec<MoveNodeId> = vec![self.origin];
        work.extend(self.members.iter().copied());
        while let Some(n) = work.pop() {
            if sched.ddg.store().node(n).is_dropped() {
                continue;
            }
            if !self.members.insert(n) {
                continue;
            }
            sched
                .ddg
                .store_mut()
                .node_mut(n)
                .flags
                .insert(NodeFlags::IN_FRONTIER);
            work.extend(sched.ddg.store().operation_siblings(n));
            work.extend(sched.universal_coupled(n));
        }
        // Predecessors of the front may become ready once it lands.
        for &m in &self.members {
            for (_, rec) in sched.ddg.in_edges(m) {
                if !rec.edge.is_back_edge() && !self.members.contains(&rec.tail) {
                    self.notify.insert(rec.tail);
                }
            }
        }
    }

    fn clear_marks(&self, sched: &mut Bf2Scheduler<'_>) {
        for &m in &self.members {
            sched
                .ddg
                .store_mut()
                .node_mut(m)
                .flags
                .remove(NodeFlags::IN_FRONTIER);
        }
    }

    /// The next front member to place: deepest from the sources first, with
    /// a strong preference for finishing operations whose other operands
    /// are already in.
    fn pick(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        children: &mut Vec<Reversible>,
    ) -> Option<MoveNodeId> {
        let mut best: Option<(i64, MoveNodeId)> = None;
        for &mn in &self.members {
            let node = sched.ddg.store().node(mn);
            if node.is_scheduled() || node.is_dropped() || sched.is_dead_result(mn) {
                continue;
            }
            if node.flags.contains(NodeFlags::PRE_LOOP_SHARED) {
                // Already dropped to the prolog.
                continue;
            }
            if sched.has_unscheduled_successors(mn) {
                continue;
            }
            let mut priority = sched.ddg.max_source_distance(mn) as i64;
            if node.is_destination_operation() && sched.ddg.store().is_last_unscheduled_input(mn) {
                priority += 10_000;
            }
            if best.is_none_or(|(p, b)| priority > p || (priority == p && mn < b)) {
                best = Some((priority, mn));
            }
        }
        let selected = best.map(|(_, mn)| mn)?;

        // Prefer the sister trigger, swapping an immediate onto it first
        // when the operation allows.
        if !sched.is_pre_loop_shared(selected) {
            if let Some(trigger) = sched.sister_trigger(selected) {
                if self.members.contains(&trigger)
                    && !sched.ddg.store().node(trigger).is_scheduled()
                    && !sched.has_unscheduled_successors(trigger)
                {
                    if let Some((a, b, _po)) = SwapOperands::find_for_trigger(sched, trigger) {
                        let _ = run_child(
                            children,
                            TransformKind::SwapOperands(SwapOperands::new(a, b)),
                            sched,
                        );
                    }
                    return Some(trigger);
                }
            }
        }
        Some(selected)
    }

    /// The retry ladder for one move. A `false` return either lowered
    /// `latest` (retry the front lower) or forbade an optimization (retry
    /// the front as-is).
    fn try_to_schedule_move_outer(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        children: &mut Vec<Reversible>,
        mn: MoveNodeId,
        latest: &mut i32,
    ) -> bool {
        // Pre-loop shared operands go to the prolog, not the body.
        if sched.is_pre_loop_shared(mn) {
            if run_child(
                children,
                TransformKind::DropPreShared(DropPreShared::new(mn)),
                sched,
            ) {
                return true;
            }
            self.lower_latest(sched, latest);
            return false;
        }

        // Results nobody reads die before any placement effort.
        if sched.ddg.store().node(mn).mov.destination.is_register()
            && run_child(children, TransformKind::DreEarly(DreEarly::new(mn)), sched)
        {
            return true;
        }

        let limits = self.preferred_limits(sched, mn);
        if limits.direction == Direction::Exact && *latest < limits.latest {
            *latest = i32::MIN;
            return false;
        }
        let bounded = Limits {
            latest: limits.latest.min(*latest),
            ..limits
        };

        // First everything enabled.
        if self.schedule_move(sched, children, mn, bounded, true, true, true) {
            return true;
        }
        if bounded.direction == Direction::TopDown {
            let fallback = Limits {
                direction: Direction::BottomUp,
                earliest: 0,
                latest: bounded.latest,
            };
            if self.schedule_move(sched, children, mn, fallback, true, true, true) {
                return true;
            }
        }
        // Without early sharing.
        if self.schedule_move(sched, children, mn, bounded, true, true, false) {
            return true;
        }
        // Without early bypass.
        if self.schedule_move(sched, children, mn, bounded, false, true, true) {
            return true;
        }
        // Without early bypass or sharing.
        if self.schedule_move(sched, children, mn, bounded, false, true, false) {
            return true;
        }
        // Revert an earlier bypass that is the root cause; the ceiling
        // stays where it is.
        if self.try_revert_earlier_bypass(sched, mn) {
            return false;
        }
        // Without late bypass.
        if self.schedule_move(sched, children, mn, bounded, true, false, true) {
            return true;
        }
        // Without any bypass.
        if self.schedule_move(sched, children, mn, bounded, false, false, true) {
            return true;
        }
        // A multi-destination share that cannot be placed is forbidden; the
        // front restart then unwinds the share and takes another route.
        if sched.ddg.store().node(mn).destination_operation_count() > 1
            && sched.illegal_operand_shares.insert(mn)
        {
            log::debug!(target: "scheduler:front", "forbidding operand share of {mn}");
            return false;
        }

        self.lower_latest(sched, latest);
        false
    }

    fn lower_latest(&self, sched: &Bf2Scheduler<'_>, latest: &mut i32) {
        let lc_front = self.latest_scheduled_cycle(sched);
        match lc_front {
            Some(c) if c <= *latest => *latest = c - 1,
            _ => *latest -= 1,
        }
    }

    fn latest_scheduled_cycle(&self, sched: &Bf2Scheduler<'_>) -> Option<i32> {
        self.members
            .iter()
            .filter_map(|m| sched.ddg.store().node(*m).cycle)
            .max()
    }

    fn try_revert_earlier_bypass(&self, sched: &mut Bf2Scheduler<'_>, mn: MoveNodeId) -> bool {
        let Some((src, dst)) = sched.find_revertable_bypass(mn) else {
            return false;
        };
        // Newly forbidden only; a pair already on the list brings nothing.
        sched.forbidden_bypass.insert((src, dst))
    }

    fn preferred_limits(&self, sched: &Bf2Scheduler<'_>, mn: MoveNodeId) -> Limits {
        let mut limits = Limits {
            direction: Direction::BottomUp,
            earliest: 0,
            latest: i32::MAX,
        };
        if let Some(pref) = self.pref_result_cycle(sched, mn) {
            limits.earliest = pref;
            limits.direction = Direction::TopDown;
        }
        if sched.is_control_flow_move(mn) {
            let cycle = sched.latest_cycle - sched.delay_slots();
            limits.earliest = cycle;
            limits.latest = cycle;
            limits.direction = Direction::Exact;
        }
        if sched.loop_mode.guard_between_iters() && sched.ii != 0 && sched.writes_jump_guard(mn) {
            // Competing writers of the guard register defeat loop
            // scheduling outright.
            let other_writers = sched.ddg.in_edges(mn).any(|(_, rec)| {
                rec.edge.kind == ttac_ddg::EdgeKind::Register
                    && rec.edge.dep == ttac_ddg::DepType::Waw
            });
            if other_writers {
                limits.earliest = -1;
                limits.latest = -1;
                limits.direction = Direction::Exact;
                return limits;
            }
            let Some(guard_reg) = sched.jump_guard().and_then(|g| g.guard_register()) else {
                return limits;
            };
            let glat = sched.machine.rf(guard_reg.rf).guard_latency as i32
                + sched.machine.control_unit().global_guard_latency as i32;
            let cycle = sched.ii as i32 - glat;
            limits.earliest = cycle;
            limits.latest = cycle;
            limits.direction = Direction::Exact;
        }
        limits
    }

    /// The cycle at which this result read lines up with its already
    /// scheduled sibling outputs: the operation starts once, so every
    /// output's read is pinned to the same trigger.
    fn pref_result_cycle(&self, sched: &Bf2Scheduler<'_>, mn: MoveNodeId) -> Option<i32> {
        let store = sched.ddg.store();
        let node = store.node(mn);
        let po = node.source_op?;
        if node.is_destination_operation() {
            return None;
        }
        let op = store.po(po).op;
        let desc = sched.registry.get(op);
        let my_index = node.mov.source.operation_index()?;
        let mut pref: Option<i32> = None;
        for &out in store.po(po).outputs.iter() {
            if out == mn {
                continue;
            }
            let out_node = store.node(out);
            let Some(oc) = out_node.cycle else { continue };
            let Some(out_index) = out_node.mov.source.operation_index() else {
                continue;
            };
            let latest_trigger = oc - desc.latency(out_index) as i32;
            let mine = latest_trigger + desc.latency(my_index) as i32;
            pref = Some(pref.map_or(mine, |p| p.min(mine)));
        }
        pref
    }

    fn schedule_move(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        children: &mut Vec<Reversible>,
        mn: MoveNodeId,
        limits: Limits,
        allow_early_bypass: bool,
        allow_late_bypass: bool,
        allow_early_share: bool,
    ) -> bool {
        let kind = match limits.direction {
            Direction::BottomUp => TransformKind::ScheduleBu(ScheduleBu::new(
                mn,
                limits.latest,
                allow_early_bypass,
                allow_late_bypass,
                allow_early_share,
            )),
            Direction::TopDown => TransformKind::ScheduleTd(ScheduleTd::new(mn, limits.earliest)),
            Direction::Exact => TransformKind::ScheduleExact(ScheduleExact::new(mn, limits.earliest)),
        };
        run_child(children, kind, sched)
    }
}

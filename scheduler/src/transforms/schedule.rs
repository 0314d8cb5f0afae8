use ttac_ddg::{DepType, EdgeIgnore, EdgeKind};
use ttac_program::MoveNodeId;
use ttac_resources::AssignOpts;

use crate::{
    reversible::{run_child, undo_children, Reversible, TransformKind},
    sched::Bf2Scheduler,
    transforms::{
        assign::AssignMove,
        bypass::{EarlyBypass, LateBypass, LoopBypass},
        dre::{DreEarly, DreLoop},
        push::{PushMoveDown, PushMoveUp},
        regcopy::RegCopyBefore,
        share::ShareOperand,
    },
};

/// The unscheduled producer whose value `node` reads, when a bypass could
/// absorb the read.
fn bypass_source(sched: &Bf2Scheduler<'_>, node: MoveNodeId) -> Option<MoveNodeId> {
    if !sched.ddg.store().node(node).mov.source.is_register() {
        return None;
    }
    let src = sched.ddg.only_register_raw_source(node, false, 1)?;
    let s = sched.ddg.store().node(src);
    if s.is_scheduled() || s.source_op.is_none() {
        return None;
    }
    Some(src)
}

fn is_result_write(sched: &Bf2Scheduler<'_>, node: MoveNodeId) -> bool {
    let n = sched.ddg.store().node(node);
    n.source_op.is_some() && n.mov.destination.is_register()
}

/// A scheduled antidependence successor sitting at or below `latest`,
/// whose eviction could free a cycle for `node`.
fn blocking_antidep_successor(
    sched: &Bf2Scheduler<'_>,
    node: MoveNodeId,
    latest: i32,
) -> Option<MoveNodeId> {
    let mut best: Option<(i32, MoveNodeId)> = None;
    for (_, rec) in sched.ddg.out_edges(node) {
        if rec.edge.kind != EdgeKind::Register
            || !matches!(rec.edge.dep, DepType::War | DepType::Waw)
            || rec.edge.is_back_edge()
        {
            continue;
        }
        let head = sched.ddg.store().node(rec.head);
        if let Some(hc) = head.cycle {
            if hc <= latest && best.is_none_or(|(bc, _)| hc < bc) {
                best = Some((hc, rec.head));
            }
        }
    }
    best.map(|(_, n)| n)
}

/// No bus connects the move's source to any candidate destination port.
fn needs_reg_copy(sched: &Bf2Scheduler<'_>, node: MoveNodeId) -> bool {
    use ttac_program::Terminal;
    let n = sched.ddg.store().node(node);
    let Some(src_reg) = n.mov.source.as_register() else {
        return false;
    };
    let Terminal::FuPort { op, operand, .. } = n.mov.destination else {
        return false;
    };
    let mut any_pair = false;
    for fu in sched.machine.fus_implementing(op) {
        let Some(port) = sched
            .machine
            .fu(fu)
            .hw_operation(op)
            .and_then(|hw| hw.port_of(operand))
        else {
            continue;
        };
        for read in sched.machine.rf_read_ports(src_reg.rf) {
            any_pair = true;
            if !sched.machine.buses_connecting(read, port).is_empty() {
                return false;
            }
        }
    }
    any_pair
}

/// Bottom-up placement of one move, with the optimization attempts folded
/// in: operand sharing and bypassing first, then the cycle search, with
/// antidependence push-down and register-copy insertion as fallbacks.
pub struct ScheduleBu {
    pub node: MoveNodeId,
    latest_bound: i32,
    allow_early_bypass: bool,
    allow_late_bypass: bool,
    allow_early_share: bool,
}

impl ScheduleBu {
    pub fn new(
        node: MoveNodeId,
        latest_bound: i32,
        allow_early_bypass: bool,
        allow_late_bypass: bool,
        allow_early_share: bool,
    ) -> Self {
        Self {
            node,
            latest_bound,
            allow_early_bypass,
            allow_late_bypass,
            allow_early_share,
        }
    }

    /// No optimizations, just placement.
    pub fn conservative(node: MoveNodeId, latest_bound: i32) -> Self {
        Self::new(node, latest_bound, false, false, false)
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let node = self.node;
        if sched.ddg.store().node(node).is_scheduled() {
            return false;
        }

        // Operand sharing: the whole write may disappear.
        if self.allow_early_share {
            if let Some(kept) = ShareOperand::find_candidate(sched, node) {
                if run_child(
                    pre,
                    TransformKind::ShareOperand(ShareOperand::new(node, kept)),
                    sched,
                ) {
                    return true;
                }
            }
        }

        // Bypass the unscheduled producer feeding this read.
        if self.allow_early_bypass && sched.options.bypassing {
            if let Some(src) = bypass_source(sched, node) {
                let kind = if sched.ddg.is_loop_bypass(src, node) {
                    TransformKind::LoopBypass(LoopBypass::new(src, node))
                } else {
                    TransformKind::EarlyBypass(EarlyBypass::new(src, node))
                };
                if run_child(pre, kind, sched)
                    && sched.options.kill_dead_results
                    && !sched.ddg.result_used(src)
                {
                    let _ = run_child(pre, TransformKind::DreEarly(DreEarly::new(src)), sched);
                }
            }
        }

        // A result write being scheduled may instead bypass into its
        // already placed consumers, possibly dying entirely.
        if self.allow_late_bypass && sched.options.bypassing && is_result_write(sched, node) {
            let consumers = sched.ddg.register_raw_destinations(node, false, false);
            for dst in consumers {
                if sched.ddg.store().node(dst).is_scheduled() {
                    let _ = run_child(
                        pre,
                        TransformKind::LateBypass(LateBypass::new(node, dst)),
                        sched,
                    );
                }
            }
            // A fully bypassed result dies: in loop mode a live-out value
            // drains through the epilog, otherwise the write just goes.
            if sched.options.kill_dead_results {
                if run_child(pre, TransformKind::DreLoop(DreLoop::new(node)), sched) {
                    return true;
                }
                if !sched.ddg.result_used(node)
                    && run_child(pre, TransformKind::DreEarly(DreEarly::new(node)), sched)
                {
                    return true;
                }
            }
        }

        if self.place(sched, pre, post) {
            true
        } else {
            undo_children(post, sched);
            undo_children(pre, sched);
            false
        }
    }

    fn place(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let node = self.node;
        let ignore = EdgeIgnore::default();
        let bounds = |sched: &Bf2Scheduler<'_>, this: &Self| {
            let mut latest = this.latest_bound.min(sched.latest_cycle);
            if let Some(l) = sched.ddg.latest_cycle(node, sched.ii, ignore) {
                latest = latest.min(l);
            }
            let earliest = sched
                .ddg
                .earliest_cycle(node, sched.ii, ignore)
                .unwrap_or(0)
                .max(0);
            (earliest, latest)
        };

        let (earliest, latest) = bounds(sched, self);
        if latest < earliest {
            return false;
        }
        let mut found =
            sched.rm.latest_cycle(latest, earliest, &sched.ddg, node, AssignOpts::default());

        // Evict the nearest scheduled antidependence successor and retry.
        if found.is_none() {
            if let Some(blocker) = blocking_antidep_successor(sched, node, latest) {
                if run_child(
                    pre,
                    TransformKind::PushMoveDown(PushMoveDown::new(blocker)),
                    sched,
                ) {
                    let (earliest, latest) = bounds(sched, self);
                    if latest >= earliest {
                        found = sched.rm.latest_cycle(
                            latest,
                            earliest,
                            &sched.ddg,
                            node,
                            AssignOpts::default(),
                        );
                    }
                }
            }
        }

        // Or pull the occupant of the wanted cycle out of the way upward.
        if found.is_none() {
            let occupant = sched
                .ddg
                .moves_at_cycle(latest)
                .iter()
                .copied()
                .find(|o| !sched.ddg.store().node(*o).is_finalized());
            if let Some(occupant) = occupant {
                if run_child(
                    pre,
                    TransformKind::PushMoveUp(PushMoveUp::new(occupant)),
                    sched,
                ) {
                    let (earliest, latest) = bounds(sched, self);
                    if latest >= earliest {
                        found = sched.rm.latest_cycle(
                            latest,
                            earliest,
                            &sched.ddg,
                            node,
                            AssignOpts::default(),
                        );
                    }
                }
            }
        }

        // No bus reaches the destination: hop through a register. The split
        // schedules both halves itself.
        if found.is_none() && needs_reg_copy(sched, node) {
            let (_, latest) = bounds(sched, self);
            return run_child(
                pre,
                TransformKind::RegCopyBefore(RegCopyBefore::new(node, latest)),
                sched,
            );
        }

        match found {
            Some(cycle) => run_child(
                post,
                TransformKind::AssignMove(AssignMove::new(node, cycle, AssignOpts::default())),
                sched,
            ),
            None => false,
        }
    }

    pub fn undo(&mut self, _sched: &mut Bf2Scheduler<'_>) {
        // The children carry the whole effect.
    }
}

/// Top-down placement, used for the source of an already scheduled result:
/// the earliest useful cycle is known, later is waste.
pub struct ScheduleTd {
    pub node: MoveNodeId,
    earliest_bound: i32,
}

impl ScheduleTd {
    pub fn new(node: MoveNodeId, earliest_bound: i32) -> Self {
        Self {
            node,
            earliest_bound,
        }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        _pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let node = self.node;
        if sched.ddg.store().node(node).is_scheduled() {
            return false;
        }
        let ignore = EdgeIgnore::default();
        let earliest = sched
            .ddg
            .earliest_cycle(node, sched.ii, ignore)
            .unwrap_or(0)
            .max(self.earliest_bound)
            .max(0);
        let mut latest = sched.latest_cycle;
        if let Some(l) = sched.ddg.latest_cycle(node, sched.ii, ignore) {
            latest = latest.min(l);
        }
        if latest < earliest {
            return false;
        }
        let found = sched
            .rm
            .earliest_cycle(earliest, &sched.ddg, node, AssignOpts::default())
            .filter(|c| *c <= latest);
        match found {
            Some(cycle) => run_child(
                post,
                TransformKind::AssignMove(AssignMove::new(node, cycle, AssignOpts::default())),
                sched,
            ),
            None => false,
        }
    }

    pub fn undo(&mut self, _sched: &mut Bf2Scheduler<'_>) {}
}

/// Placement at one exact cycle: control-flow moves and the loop's jump
/// guard write allow no slack.
pub struct ScheduleExact {
    pub node: MoveNodeId,
    cycle: i32,
}

impl ScheduleExact {
    pub fn new(node: MoveNodeId, cycle: i32) -> Self {
        Self { node, cycle }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        _pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let node = self.node;
        if self.cycle < 0 || sched.ddg.store().node(node).is_scheduled() {
            return false;
        }
        let ignore = EdgeIgnore::default();
        if let Some(e) = sched.ddg.earliest_cycle(node, sched.ii, ignore) {
            if self.cycle < e {
                return false;
            }
        }
        if let Some(l) = sched.ddg.latest_cycle(node, sched.ii, ignore) {
            if self.cycle > l {
                return false;
            }
        }
        run_child(
            post,
            TransformKind::AssignMove(AssignMove::new(node, self.cycle, AssignOpts::default())),
            sched,
        )
    }

    pub fn undo(&mut self, _sched: &mut Bf2Scheduler<'_>) {}
}

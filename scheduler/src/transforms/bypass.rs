use ttac_ddg::{EdgeIgnore, MergeUndo};
use ttac_program::{GuardSrc, MoveGuard, MoveNodeId};
use ttac_resources::AssignOpts;

use crate::{
    reversible::{run_child, undo_children, Reversible, TransformKind},
    sched::Bf2Scheduler,
    transforms::{assign::AssignMove, unschedule::UnscheduleMove},
};

fn bypass_allowed(sched: &Bf2Scheduler<'_>, src: MoveNodeId, dst: MoveNodeId) -> bool {
    !sched.forbidden_bypass.contains(&(src, dst))
        && sched.options.bypassing
        && sched.ddg.merge_and_keep_allowed(src, dst)
}

/// Rewire an operand read to the producer's FU output before either move
/// is scheduled.
pub struct EarlyBypass {
    pub src: MoveNodeId,
    pub dst: MoveNodeId,
    merge: Option<MergeUndo>,
}

impl EarlyBypass {
    pub fn new(src: MoveNodeId, dst: MoveNodeId) -> Self {
        Self {
            src,
            dst,
            merge: None,
        }
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>, _post: &mut Vec<Reversible>) -> bool {
        if !bypass_allowed(sched, self.src, self.dst) {
            return false;
        }
        if sched.ddg.is_loop_bypass(self.src, self.dst) {
            // The loop variant owns the back-edge case.
            return false;
        }
        let Some(merge) = sched.ddg.merge_and_keep(self.src, self.dst) else {
            return false;
        };
        sched.bypass_map.insert(self.dst, self.src);
        self.merge = Some(merge);
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        sched.bypass_map.remove(&self.dst);
        sched.ddg.unmerge(self.merge.take().expect("undo of unapplied bypass"));
    }
}

/// Bypass over the loop back edge: the consumer reads the previous
/// iteration's value straight off the FU, and the prolog image supplies
/// the value for the first iteration.
pub struct LoopBypass {
    pub src: MoveNodeId,
    pub dst: MoveNodeId,
    merge: Option<MergeUndo>,
}

impl LoopBypass {
    pub fn new(src: MoveNodeId, dst: MoveNodeId) -> Self {
        Self {
            src,
            dst,
            merge: None,
        }
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>, _post: &mut Vec<Reversible>) -> bool {
        if sched.ii == 0 || !bypass_allowed(sched, self.src, self.dst) {
            return false;
        }
        if !sched.ddg.is_loop_bypass(self.src, self.dst) {
            return false;
        }
        let ii = sched.ii as i32;
        // Estimate the post-bypass dependence bound on the consumer. A
        // bound exactly at the interval with resources free below it means
        // the bypass saves one cycle in the critical path.
        let ec = sched
            .rm
            .earliest_cycle(0, &sched.ddg, self.dst, AssignOpts::default())
            .unwrap_or(0);
        let mut ddgc = sched
            .ddg
            .earliest_cycle(self.dst, sched.ii, EdgeIgnore::default())
            .unwrap_or(0);
        if ddgc == ii && ec < ii {
            ddgc -= 1;
        }
        if ddgc >= ii {
            return false;
        }
        let Some(merge) = sched.ddg.merge_and_keep(self.src, self.dst) else {
            return false;
        };
        sched.bypass_map.insert(self.dst, self.src);
        self.merge = Some(merge);
        log::trace!(target: "scheduler:bypass", "loop bypass {} -> {}", self.src, self.dst);
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        sched.bypass_map.remove(&self.dst);
        sched.ddg.unmerge(self.merge.take().expect("undo of unapplied bypass"));
    }
}

/// Bypass into an already scheduled consumer: take it out, rewire it, and
/// put it back strictly enough earlier to pay for the churn.
pub struct LateBypass {
    pub src: MoveNodeId,
    pub dst: MoveNodeId,
    /// Post-pass runs accept any legal cycle; in-schedule runs demand the
    /// configured gap.
    postpass: bool,
    merge: Option<MergeUndo>,
}

impl LateBypass {
    pub fn new(src: MoveNodeId, dst: MoveNodeId) -> Self {
        Self {
            src,
            dst,
            postpass: false,
            merge: None,
        }
    }

    pub fn postpass(src: MoveNodeId, dst: MoveNodeId) -> Self {
        Self {
            src,
            dst,
            postpass: true,
            merge: None,
        }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        if !bypass_allowed(sched, self.src, self.dst) {
            return false;
        }
        let Some(old_cycle) = sched.ddg.store().node(self.dst).cycle else {
            return false;
        };
        if sched.ddg.store().node(self.dst).is_finalized() {
            return false;
        }
        if !run_child(
            pre,
            TransformKind::UnscheduleMove(UnscheduleMove::new(self.dst)),
            sched,
        ) {
            return false;
        }
        let Some(merge) = sched.ddg.merge_and_keep(self.src, self.dst) else {
            undo_children(pre, sched);
            return false;
        };
        self.merge = Some(merge);
        sched.bypass_map.insert(self.dst, self.src);

        let earliest = sched
            .ddg
            .earliest_cycle(self.dst, sched.ii, EdgeIgnore::default())
            .unwrap_or(0)
            .max(0);
        let target = if self.postpass {
            old_cycle
        } else {
            old_cycle - sched.options.late_bypass_gap
        };
        let found = if target >= earliest {
            sched.rm.latest_cycle(target, earliest, &sched.ddg, self.dst, AssignOpts::default())
        } else {
            None
        };
        let ok = match found {
            Some(cycle) => run_child(
                post,
                TransformKind::AssignMove(AssignMove::new(self.dst, cycle, AssignOpts::default())),
                sched,
            ),
            None => false,
        };
        if !ok {
            undo_children(post, sched);
            sched.bypass_map.remove(&self.dst);
            sched.ddg.unmerge(self.merge.take().unwrap());
            undo_children(pre, sched);
            return false;
        }
        log::trace!(
            target: "scheduler:bypass",
            "late bypass {} -> {} ({} cycles gained)",
            self.src,
            self.dst,
            old_cycle - sched.ddg.store().node(self.dst).cycle()
        );
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        sched.bypass_map.remove(&self.dst);
        sched.ddg.unmerge(self.merge.take().expect("undo of unapplied bypass"));
    }
}

/// Convert a register guard into the producing FU's port guard, freeing
/// the guard register write from the critical path.
pub struct GuardConversion {
    pub node: MoveNodeId,
    old_guard: Option<MoveGuard>,
}

impl GuardConversion {
    pub fn new(node: MoveNodeId) -> Self {
        Self {
            node,
            old_guard: None,
        }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let node = self.node;
        let Some(guard) = sched.ddg.store().node(node).mov.guard else {
            return false;
        };
        if !matches!(guard.source, GuardSrc::Register(_)) {
            return false;
        }
        // The guard value must come from exactly one comparison result
        // whose unit the machine can guard on directly.
        let Some(def) = sched.ddg.only_guard_def(node) else {
            return false;
        };
        let def_node = sched.ddg.store().node(def);
        let Some(po) = def_node.source_op else {
            return false;
        };
        let Some(operand) = def_node.mov.source.operation_index() else {
            return false;
        };
        let op = sched.ddg.store().po(po).op;
        let Some(fu) = sched
            .ddg
            .store()
            .po(po)
            .fu
            .or_else(|| sched.machine.fus_implementing(op).next())
        else {
            return false;
        };
        let Some(port) = sched
            .machine
            .fu(fu)
            .hw_operation(op)
            .and_then(|hw| hw.port_of(operand))
        else {
            return false;
        };
        if sched
            .machine
            .find_guard(
                ttac_machine::GuardSource::FuPort { fu, port },
                guard.inverted,
            )
            .is_none()
        {
            return false;
        }

        let was_scheduled = sched.ddg.store().node(node).is_scheduled();
        let old_cycle = sched.ddg.store().node(node).cycle;
        if was_scheduled
            && !run_child(
                pre,
                TransformKind::UnscheduleMove(UnscheduleMove::new(node)),
                sched,
            )
        {
            return false;
        }
        self.old_guard = Some(guard);
        sched.ddg.store_mut().node_mut(node).mov.guard = Some(MoveGuard {
            source: GuardSrc::FuPort { fu, op, operand },
            inverted: guard.inverted,
        });
        if let Some(cycle) = old_cycle {
            if !run_child(
                post,
                TransformKind::AssignMove(AssignMove::new(node, cycle, AssignOpts::default())),
                sched,
            ) {
                sched.ddg.store_mut().node_mut(node).mov.guard = self.old_guard.take();
                undo_children(pre, sched);
                return false;
            }
        }
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        sched.ddg.store_mut().node_mut(self.node).mov.guard =
            Some(self.old_guard.take().expect("undo of unapplied conversion"));
    }
}

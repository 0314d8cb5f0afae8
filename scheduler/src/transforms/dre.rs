use smallvec::SmallVec;
use ttac_ddg::{CopiedDeps, DepType, DroppedNode};
use ttac_program::{MoveNodeId, NodeFlags};
use ttac_resources::AssignOpts;
use ttac_session::PROLOG_CYCLE_BIAS;

use crate::{
    reversible::{run_child, undo_children, Reversible, TransformKind},
    sched::{Bf2Scheduler, EPILOG_EXTRA_BIAS},
    transforms::unschedule::UnscheduleMove,
};

/// Shared kill machinery: drop a dead result write and, when that starves
/// the producing operation entirely, the operation's remaining moves too.
#[derive(Default)]
struct Kill {
    copied: Option<CopiedDeps>,
    dropped: SmallVec<[DroppedNode; 4]>,
    marked: SmallVec<[MoveNodeId; 4]>,
}

impl Kill {
    /// `allow_live_out` is for the loop variant, which drains the value
    /// through an epilog copy: liveness alone then does not protect the
    /// write, actual readers still do.
    fn try_kill(
        sched: &mut Bf2Scheduler<'_>,
        node: MoveNodeId,
        allow_live_out: bool,
    ) -> Option<Kill> {
        let n = sched.ddg.store().node(node);
        if n.is_scheduled() || n.is_dropped() {
            return None;
        }
        if !n.mov.destination.is_register() {
            return None;
        }
        let raw_successor = sched
            .ddg
            .out_edges(node)
            .any(|(_, rec)| rec.edge.dep == DepType::Raw && rec.edge.is_register_or_ra());
        if raw_successor {
            return None;
        }
        if !allow_live_out && sched.ddg.result_used(node) {
            return None;
        }
        let mut kill = Kill {
            copied: Some(sched.ddg.copy_deps_over(node, true, false)),
            ..Kill::default()
        };
        let producer = sched.ddg.store().node(node).source_op;
        kill.dropped.push(sched.ddg.drop_node(node));
        Self::mark(sched, &mut kill, node);

        // When every result of the producing operation is now dead, the
        // whole instance is: its operand writes go too.
        if let Some(po) = producer {
            let starved = sched
                .ddg
                .store()
                .po(po)
                .outputs
                .iter()
                .all(|o| sched.ddg.store().node(*o).is_dropped());
            if starved {
                let inputs: Vec<MoveNodeId> = sched
                    .ddg
                    .store()
                    .po(po)
                    .inputs
                    .iter()
                    .copied()
                    .filter(|i| {
                        let n = sched.ddg.store().node(*i);
                        !n.is_scheduled() && !n.is_dropped()
                    })
                    .collect();
                for input in inputs {
                    kill.dropped.push(sched.ddg.drop_node(input));
                    Self::mark(sched, &mut kill, input);
                }
            }
        }
        log::trace!(target: "scheduler:dre", "killed {node} and {} dependents", kill.marked.len() - 1);
        Some(kill)
    }

    fn mark(sched: &mut Bf2Scheduler<'_>, kill: &mut Kill, node: MoveNodeId) {
        sched.dead_results.insert(node);
        sched
            .ddg
            .store_mut()
            .node_mut(node)
            .flags
            .insert(NodeFlags::DEAD);
        kill.marked.push(node);
    }

    fn revert(&mut self, sched: &mut Bf2Scheduler<'_>) {
        while let Some(d) = self.dropped.pop() {
            sched.ddg.restore_node(d);
        }
        for m in self.marked.drain(..) {
            sched.dead_results.remove(&m);
            sched.ddg.store_mut().node_mut(m).flags.remove(NodeFlags::DEAD);
        }
        if let Some(c) = self.copied.take() {
            sched.ddg.remove_copied_deps(c);
        }
    }
}

/// Kill a dead result before it is ever scheduled.
pub struct DreEarly {
    node: MoveNodeId,
    kill: Option<Kill>,
}

impl DreEarly {
    pub fn new(node: MoveNodeId) -> Self {
        Self { node, kill: None }
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>, _post: &mut Vec<Reversible>) -> bool {
        if !sched.options.kill_dead_results {
            return false;
        }
        // In loop mode a live-out value needs the epilog variant instead.
        if sched.ii > 0 {
            let Some(reg) = sched.ddg.store().node(self.node).mov.destination.as_register()
            else {
                return false;
            };
            let live_out = sched
                .ddg
                .sole_live_range()
                .is_some_and(|lr| lr.is_live_out(reg));
            if live_out {
                return false;
            }
        }
        match Kill::try_kill(sched, self.node, false) {
            Some(kill) => {
                self.kill = Some(kill);
                true
            }
            None => false,
        }
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        self.kill.take().expect("undo of unapplied DRE").revert(sched);
    }
}

/// Kill a result write that late bypasses just orphaned; unschedules it
/// first when needed.
pub struct DreLate {
    node: MoveNodeId,
    kill: Option<Kill>,
}

impl DreLate {
    pub fn new(node: MoveNodeId) -> Self {
        Self { node, kill: None }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        _post: &mut Vec<Reversible>,
    ) -> bool {
        if !sched.options.kill_dead_results {
            return false;
        }
        if sched.ddg.store().node(self.node).is_scheduled() {
            if !run_child(
                pre,
                TransformKind::UnscheduleMove(UnscheduleMove::new(self.node)),
                sched,
            ) {
                return false;
            }
        }
        match Kill::try_kill(sched, self.node, false) {
            Some(kill) => {
                self.kill = Some(kill);
                true
            }
            None => {
                undo_children(pre, sched);
                false
            }
        }
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        self.kill.take().expect("undo of unapplied DRE").revert(sched);
    }
}

/// Loop-mode kill of a live-out result: the write disappears from the
/// kernel and a drain copy lands in the epilog so the value still leaves
/// the loop.
pub struct DreLoop {
    node: MoveNodeId,
    kill: Option<Kill>,
    epilog_copy: Option<MoveNodeId>,
}

impl DreLoop {
    pub fn new(node: MoveNodeId) -> Self {
        Self {
            node,
            kill: None,
            epilog_copy: None,
        }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        _post: &mut Vec<Reversible>,
    ) -> bool {
        if sched.ii == 0 || !sched.loop_mode.has_epilog() || !sched.options.kill_dead_results {
            return false;
        }
        let Some(reg) = sched.ddg.store().node(self.node).mov.destination.as_register() else {
            return false;
        };
        let live_out = sched
            .ddg
            .sole_live_range()
            .is_some_and(|lr| lr.is_live_out(reg));
        if !live_out {
            return false;
        }
        if sched.ddg.store().node(self.node).is_scheduled() {
            if !run_child(
                pre,
                TransformKind::UnscheduleMove(UnscheduleMove::new(self.node)),
                sched,
            ) {
                return false;
            }
        }

        // Materialize the drain copy first; if the epilog has no room the
        // kill must not happen either.
        let (copy, _) = {
            let duplicator = sched.duplicator.as_mut().expect("loop mode without duplicator");
            duplicator.duplicate(&sched.ddg, self.node, None)
        };
        let epilog_base = PROLOG_CYCLE_BIAS + EPILOG_EXTRA_BIAS;
        let cycle = {
            let duplicator = sched.duplicator.as_ref().unwrap();
            let prolog_rm = sched.prolog_rm.as_ref().expect("loop mode without prolog rm");
            prolog_rm.earliest_cycle(epilog_base, duplicator.prolog_ddg(), copy, AssignOpts::default())
        };
        let assigned = match cycle {
            Some(c) => {
                let duplicator = sched.duplicator.as_mut().unwrap();
                let prolog_rm = sched.prolog_rm.as_mut().unwrap();
                prolog_rm
                    .assign(c, duplicator.prolog_ddg_mut(), copy, AssignOpts::default())
                    .is_ok()
            }
            None => false,
        };
        if !assigned {
            sched.duplicator.as_mut().unwrap().dispose(self.node);
            undo_children(pre, sched);
            return false;
        }

        match Kill::try_kill(sched, self.node, true) {
            Some(kill) => {
                self.kill = Some(kill);
                self.epilog_copy = Some(copy);
                true
            }
            None => {
                let duplicator = sched.duplicator.as_mut().unwrap();
                let prolog_rm = sched.prolog_rm.as_mut().unwrap();
                let _ = prolog_rm.unassign(duplicator.prolog_ddg_mut(), copy);
                duplicator.dispose(self.node);
                undo_children(pre, sched);
                false
            }
        }
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        self.kill.take().expect("undo of unapplied DRE").revert(sched);
        if let Some(copy) = self.epilog_copy.take() {
            let duplicator = sched.duplicator.as_mut().unwrap();
            let prolog_rm = sched.prolog_rm.as_mut().unwrap();
            let _ = prolog_rm.unassign(duplicator.prolog_ddg_mut(), copy);
            duplicator.dispose(self.node);
        }
    }
}

use ttac_ddg::EdgeIgnore;
use ttac_program::MoveNodeId;
use ttac_resources::AssignOpts;

use crate::{
    reversible::{run_child, undo_children, Reversible, TransformKind},
    sched::Bf2Scheduler,
    transforms::{assign::AssignMove, unschedule::UnscheduleMove},
};

/// Reschedule an already placed move to an earlier cycle to clear the way
/// for the one being scheduled.
pub struct PushMoveUp {
    pub node: MoveNodeId,
}

impl PushMoveUp {
    pub fn new(node: MoveNodeId) -> Self {
        Self { node }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let Some(old) = sched.ddg.store().node(self.node).cycle else {
            return false;
        };
        if sched.ddg.store().node(self.node).is_finalized() {
            return false;
        }
        if !run_child(
            pre,
            TransformKind::UnscheduleMove(UnscheduleMove::new(self.node)),
            sched,
        ) {
            return false;
        }
        let floor = |sched: &Bf2Scheduler<'_>, node| {
            sched
                .ddg
                .earliest_cycle(node, sched.ii, EdgeIgnore::default())
                .unwrap_or(0)
                .max(0)
        };
        let mut lo = floor(sched, self.node);
        // The dependence floor itself may be movable: cascade through the
        // binding predecessor once.
        if lo >= old {
            if let Some(binding) = self.binding_predecessor(sched, lo) {
                if run_child(
                    pre,
                    TransformKind::PushMoveUp(PushMoveUp::new(binding)),
                    sched,
                ) {
                    lo = floor(sched, self.node);
                }
            }
        }
        let found = if old > lo {
            sched
                .rm
                .latest_cycle(old - 1, lo, &sched.ddg, self.node, AssignOpts::default())
        } else {
            None
        };
        let ok = match found {
            Some(cycle) => run_child(
                post,
                TransformKind::AssignMove(AssignMove::new(self.node, cycle, AssignOpts::default())),
                sched,
            ),
            None => false,
        };
        if !ok {
            undo_children(post, sched);
            undo_children(pre, sched);
            return false;
        }
        true
    }

    /// The scheduled predecessor whose edge pins the dependence floor.
    fn binding_predecessor(
        &self,
        sched: &Bf2Scheduler<'_>,
        floor: i32,
    ) -> Option<MoveNodeId> {
        for (_, rec) in sched.ddg.in_edges(self.node) {
            if rec.edge.is_back_edge() {
                continue;
            }
            let tail = sched.ddg.store().node(rec.tail);
            if tail.is_finalized() {
                continue;
            }
            if let Some(tc) = tail.cycle {
                if tc + sched.ddg.edge_latency(rec, sched.ii) == floor {
                    return Some(rec.tail);
                }
            }
        }
        None
    }

    pub fn undo(&mut self, _sched: &mut Bf2Scheduler<'_>) {
        // The children carry the whole effect.
    }
}

/// Reschedule an already placed move to a later cycle, bounded by its
/// dependences and the current ceiling.
pub struct PushMoveDown {
    pub node: MoveNodeId,
}

impl PushMoveDown {
    pub fn new(node: MoveNodeId) -> Self {
        Self { node }
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let Some(old) = sched.ddg.store().node(self.node).cycle else {
            return false;
        };
        if sched.ddg.store().node(self.node).is_finalized() {
            return false;
        }
        if !run_child(
            pre,
            TransformKind::UnscheduleMove(UnscheduleMove::new(self.node)),
            sched,
        ) {
            return false;
        }
        let ceiling = sched
            .ddg
            .latest_cycle(self.node, sched.ii, EdgeIgnore::default())
            .unwrap_or(sched.latest_cycle)
            .min(sched.latest_cycle);
        let found = if old < ceiling {
            sched
                .rm
                .earliest_cycle(old + 1, &sched.ddg, self.node, AssignOpts::default())
                .filter(|c| *c <= ceiling)
        } else {
            None
        };
        let ok = match found {
            Some(cycle) => run_child(
                post,
                TransformKind::AssignMove(AssignMove::new(self.node, cycle, AssignOpts::default())),
                sched,
            ),
            None => false,
        };
        if !ok {
            undo_children(post, sched);
            undo_children(pre, sched);
            return false;
        }
        true
    }

    pub fn undo(&mut self, _sched: &mut Bf2Scheduler<'_>) {
        // The children carry the whole effect.
    }
}

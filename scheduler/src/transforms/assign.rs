use ttac_program::MoveNodeId;
use ttac_resources::AssignOpts;

use crate::sched::Bf2Scheduler;

/// The primitive placement step: book the resources of one move at one
/// cycle, mirroring it into the prolog image when loop scheduling wants
/// prolog materialization.
pub struct AssignMove {
    node: MoveNodeId,
    cycle: i32,
    opts: AssignOpts,
    prolog_copy: Option<MoveNodeId>,
    applied: bool,
}

impl AssignMove {
    pub fn new(node: MoveNodeId, cycle: i32, opts: AssignOpts) -> Self {
        Self {
            node,
            cycle,
            opts,
            prolog_copy: None,
            applied: false,
        }
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>) -> bool {
        match sched.assign_move(self.cycle, self.node, self.opts) {
            Ok(copy) => {
                self.prolog_copy = copy;
                self.applied = true;
                true
            }
            Err(_) => false,
        }
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        debug_assert!(self.applied);
        sched
            .unassign_move(self.node, true)
            .expect("undo of an applied assignment cannot fail");
        self.applied = false;
    }
}

use ttac_machine::BusId;
use ttac_program::MoveNodeId;
use ttac_resources::AssignOpts;

use crate::sched::Bf2Scheduler;

/// What it takes to put an assignment back exactly where it was.
#[derive(Debug, Clone, Copy)]
struct SavedAssignment {
    cycle: i32,
    bus: BusId,
    imm_write_cycle: Option<i32>,
    prolog_bus: Option<BusId>,
    prolog_imm_write_cycle: Option<i32>,
}

/// Take a scheduled move out of the schedule; undo puts it back on the
/// same cycle and bus.
pub struct UnscheduleMove {
    node: MoveNodeId,
    saved: Option<SavedAssignment>,
}

impl UnscheduleMove {
    pub fn new(node: MoveNodeId) -> Self {
        Self { node, saved: None }
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>) -> bool {
        let Some(a) = sched.rm.assignment(self.node) else {
            return false;
        };
        let mut saved = SavedAssignment {
            cycle: a.cycle,
            bus: a.bus,
            imm_write_cycle: a.imm_write_cycle,
            prolog_bus: None,
            prolog_imm_write_cycle: None,
        };
        if let (Some(duplicator), Some(prolog_rm)) =
            (sched.duplicator.as_ref(), sched.prolog_rm.as_ref())
        {
            if let Some(copy) = duplicator.get(self.node) {
                if let Some(pa) = prolog_rm.assignment(copy) {
                    saved.prolog_bus = Some(pa.bus);
                    saved.prolog_imm_write_cycle = pa.imm_write_cycle;
                }
            }
        }
        // The prolog copy is kept around so the undo can rebuild the exact
        // mirror.
        if sched.unassign_move(self.node, false).is_err() {
            return false;
        }
        self.saved = Some(saved);
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        let saved = self.saved.take().expect("undo of unapplied unschedule");
        let opts = AssignOpts {
            bus: Some(saved.bus),
            imm_write_cycle: saved.imm_write_cycle,
            prolog_bus: saved.prolog_bus,
            prolog_imm_write_cycle: saved.prolog_imm_write_cycle,
            ..AssignOpts::default()
        };
        sched
            .assign_move(saved.cycle, self.node, opts)
            .expect("restoring an unscheduled move cannot fail");
    }
}

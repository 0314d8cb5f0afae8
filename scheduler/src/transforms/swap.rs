use smallvec::SmallVec;
use ttac_ddg::{DataDependenceEdge, DepType, EdgeId, EdgeKind};
use ttac_program::{MoveNodeId, PoId};

use crate::sched::Bf2Scheduler;

/// Exchange the values of a commutative operand pair, so the trigger port
/// receives the cheaper value (typically an inline immediate).
///
/// Only the sources move; the operand-to-port bindings stay. The value
/// edges of both writes travel with their sources.
pub struct SwapOperands {
    pub a: MoveNodeId,
    pub b: MoveNodeId,
    removed: Vec<(DataDependenceEdge, MoveNodeId, MoveNodeId)>,
    added: Vec<EdgeId>,
    applied: bool,
}

impl SwapOperands {
    pub fn new(a: MoveNodeId, b: MoveNodeId) -> Self {
        Self {
            a,
            b,
            removed: Vec::new(),
            added: Vec::new(),
            applied: false,
        }
    }

    /// The operand pair to swap for `trigger`, when swapping would let the
    /// trigger carry an immediate it currently does not.
    pub fn find_for_trigger(
        sched: &Bf2Scheduler<'_>,
        trigger: MoveNodeId,
    ) -> Option<(MoveNodeId, MoveNodeId, PoId)> {
        let store = sched.ddg.store();
        let n = store.node(trigger);
        let po = n.dest_ops.first().copied()?;
        let op = store.po(po).op;
        let desc = sched.registry.get(op);
        let trig_operand = n.mov.destination.operation_index()?;
        if n.mov.source.is_immediate() {
            return None;
        }
        for operand in 1..=desc.inputs {
            if operand == trig_operand || !desc.can_swap(operand, trig_operand) {
                continue;
            }
            let other = store.input_for_operand(po, operand)?;
            let o = store.node(other);
            if !o.mov.source.is_immediate() {
                continue;
            }
            if o.is_scheduled() || n.is_scheduled() {
                continue;
            }
            // Width legality after the swap.
            let w_other = desc.operand_width(trig_operand);
            let w_trig = desc.operand_width(operand);
            if w_other == 0 || w_trig == 0 {
                continue;
            }
            return Some((other, trigger, po));
        }
        None
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>) -> bool {
        let (a, b) = (self.a, self.b);
        let store = sched.ddg.store();
        if store.node(a).is_scheduled() || store.node(b).is_scheduled() {
            return false;
        }

        // Collect the edges that travel with each source value.
        let travels = |rec: &ttac_ddg::EdgeRecord, node: MoveNodeId| {
            let value_in = rec.head == node
                && !rec.edge.is_guard_use()
                && ((rec.edge.is_register_or_ra() && rec.edge.dep == DepType::Raw)
                    || (rec.edge.kind == EdgeKind::Operation && rec.edge.dep == DepType::Raw));
            let war_out = rec.tail == node
                && rec.edge.kind == EdgeKind::Register
                && rec.edge.dep == DepType::War
                && !rec.edge.is_guard_use();
            value_in || war_out
        };
        let mut moving: SmallVec<[EdgeId; 8]> = SmallVec::new();
        for node in [a, b] {
            moving.extend(
                sched
                    .ddg
                    .in_edges(node)
                    .chain(sched.ddg.out_edges(node))
                    .filter(|(_, rec)| travels(rec, node))
                    .map(|(id, _)| id),
            );
        }
        moving.sort_unstable();
        moving.dedup();
        for id in moving {
            let (edge, tail, head) = sched.ddg.remove_edge(id);
            self.removed.push((edge, tail, head));
        }
        for (edge, tail, head) in self.removed.clone() {
            let swap = |n: MoveNodeId| if n == a { b } else if n == b { a } else { n };
            if let Ok(Some(id)) = sched.ddg.add_edge(swap(tail), swap(head), edge) {
                self.added.push(id);
            }
        }

        let store = sched.ddg.store_mut();
        let a_src = store.node(a).mov.source;
        let b_src = store.node(b).mov.source;
        store.node_mut(a).mov.source = b_src;
        store.node_mut(b).mov.source = a_src;
        self.applied = true;
        log::trace!(target: "scheduler:swap", "swapped operand values of {a} and {b}");
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        debug_assert!(self.applied);
        let (a, b) = (self.a, self.b);
        for id in self.added.drain(..) {
            let _ = sched.ddg.remove_edge(id);
        }
        for (edge, tail, head) in self.removed.drain(..) {
            let _ = sched.ddg.add_edge(tail, head, edge);
        }
        let store = sched.ddg.store_mut();
        let a_src = store.node(a).mov.source;
        let b_src = store.node(b).mov.source;
        store.node_mut(a).mov.source = b_src;
        store.node_mut(b).mov.source = a_src;
        self.applied = false;
    }
}

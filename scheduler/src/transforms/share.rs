use ttac_ddg::{DataDependenceEdge, DepType, DroppedNode, EdgeId, EdgeKind};
use ttac_program::{MoveNodeId, NodeFlags, PoId};
use ttac_resources::AssignOpts;
use ttac_session::PROLOG_CYCLE_BIAS;

use crate::sched::Bf2Scheduler;

/// Collapse two equal operand writes of different operations into one.
///
/// The surviving write feeds both operations' ports; the duplicate is
/// dropped from the graph, restorable on undo.
pub struct ShareOperand {
    /// The write to merge away.
    pub node: MoveNodeId,
    /// The equal write that stays.
    pub kept: MoveNodeId,
    po: Option<PoId>,
    input_slot: usize,
    added_trigger_edge: Option<EdgeId>,
    dropped: Option<DroppedNode>,
}

impl ShareOperand {
    pub fn new(node: MoveNodeId, kept: MoveNodeId) -> Self {
        Self {
            node,
            kept,
            po: None,
            input_slot: 0,
            added_trigger_edge: None,
            dropped: None,
        }
    }

    /// An equal, shareable operand write for `node`, if one exists.
    pub fn find_candidate(sched: &Bf2Scheduler<'_>, node: MoveNodeId) -> Option<MoveNodeId> {
        if !sched.options.operand_sharing || sched.illegal_operand_shares.contains(&node) {
            return None;
        }
        let store = sched.ddg.store();
        let n = store.node(node);
        if n.is_scheduled() || !n.mov.is_unconditional() || n.dest_ops.len() != 1 {
            return None;
        }
        let (op, operand) = match n.mov.destination {
            ttac_program::Terminal::FuPort { op, operand, .. } => (op, operand),
            _ => return None,
        };
        // Trigger writes start the operation and can never be shared.
        let desc = sched.registry.get(op);
        let trig = sched.machine.trigger_operand(op).unwrap_or(desc.inputs);
        if operand == trig {
            return None;
        }
        let my_po = n.dest_ops[0];
        let my_fu = store.po(my_po).fu;
        for other in sched.ddg.nodes() {
            if other == node || sched.illegal_operand_shares.contains(&other) {
                continue;
            }
            let o = store.node(other);
            if !o.mov.is_unconditional() || sched.is_dead_result(other) {
                continue;
            }
            let matches = matches!(
                o.mov.destination,
                ttac_program::Terminal::FuPort { op: oop, operand: oo, .. }
                    if oop == op && oo == operand
            );
            if !matches || !o.mov.source.same_location(&n.mov.source) {
                continue;
            }
            if o.dest_ops.contains(&my_po) {
                continue;
            }
            // Both operations must be able to live on the same unit.
            let other_fu = o.dest_ops.iter().find_map(|p| store.po(*p).fu);
            if my_fu.is_some() && other_fu.is_some() && my_fu != other_fu {
                continue;
            }
            // A scheduled survivor must already be in place by our trigger.
            if let Some(oc) = o.cycle {
                if let Some(trig_node) = store.trigger_input(my_po, sched.machine) {
                    if let Some(tc) = store.node(trig_node).cycle {
                        if oc > tc {
                            continue;
                        }
                    }
                }
            }
            return Some(other);
        }
        None
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>) -> bool {
        let node = self.node;
        let kept = self.kept;
        let store = sched.ddg.store();
        let Some(&po) = store.node(node).dest_ops.first() else {
            return false;
        };
        let Some(slot) = store.po(po).inputs.iter().position(|i| *i == node) else {
            return false;
        };
        let trigger = store.trigger_input(po, sched.machine);

        // Wire the survivor into the operation before dropping the
        // duplicate, so ordering against the trigger is kept.
        if let Some(trig) = trigger {
            if trig != kept {
                match sched.ddg.add_edge(
                    kept,
                    trig,
                    DataDependenceEdge::new(EdgeKind::Operation, DepType::Trigger),
                ) {
                    Ok(id) => self.added_trigger_edge = id,
                    Err(_) => return false,
                }
            }
        }
        let store = sched.ddg.store_mut();
        store.po_mut(po).inputs[slot] = kept;
        store.node_mut(kept).dest_ops.push(po);
        self.po = Some(po);
        self.input_slot = slot;
        self.dropped = Some(sched.ddg.drop_node(node));
        log::trace!(target: "scheduler:share", "shared operand {kept} replaces {node} in {po}");
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        let po = self.po.take().expect("undo of unapplied share");
        sched.ddg.restore_node(self.dropped.take().unwrap());
        let store = sched.ddg.store_mut();
        store.po_mut(po).inputs[self.input_slot] = self.node;
        let kept_ops = &mut store.node_mut(self.kept).dest_ops;
        if let Some(pos) = kept_ops.iter().position(|p| *p == po) {
            kept_ops.remove(pos);
        }
        if let Some(id) = self.added_trigger_edge.take() {
            let _ = sched.ddg.remove_edge(id);
        }
    }
}

/// Hoist a pre-loop-shared operand write into the prolog: it executes once
/// before the loop instead of every iteration.
pub struct DropPreShared {
    pub node: MoveNodeId,
    copy: Option<MoveNodeId>,
}

impl DropPreShared {
    pub fn new(node: MoveNodeId) -> Self {
        Self { node, copy: None }
    }

    pub fn apply(&mut self, sched: &mut Bf2Scheduler<'_>) -> bool {
        let Some(&(fu, _port)) = sched.pre_shared.get(&self.node) else {
            return false;
        };
        let (copy, _) = {
            let duplicator = sched.duplicator.as_mut().expect("pre-share without prolog");
            duplicator.duplicate(&sched.ddg, self.node, None)
        };
        let opts = AssignOpts {
            dst_fu: Some(fu),
            ..AssignOpts::default()
        };
        let cycle = {
            let duplicator = sched.duplicator.as_ref().unwrap();
            let prolog_rm = sched.prolog_rm.as_ref().expect("pre-share without prolog rm");
            prolog_rm.earliest_cycle(PROLOG_CYCLE_BIAS, duplicator.prolog_ddg(), copy, opts)
        };
        let ok = match cycle {
            Some(c) => {
                let duplicator = sched.duplicator.as_mut().unwrap();
                let prolog_rm = sched.prolog_rm.as_mut().unwrap();
                prolog_rm
                    .assign(c, duplicator.prolog_ddg_mut(), copy, opts)
                    .is_ok()
            }
            None => false,
        };
        if !ok {
            sched.duplicator.as_mut().unwrap().dispose(self.node);
            return false;
        }
        sched
            .ddg
            .store_mut()
            .node_mut(self.node)
            .flags
            .insert(NodeFlags::PRE_LOOP_SHARED);
        self.copy = Some(copy);
        true
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        let copy = self.copy.take().expect("undo of unapplied pre-share");
        {
            let duplicator = sched.duplicator.as_mut().unwrap();
            let prolog_rm = sched.prolog_rm.as_mut().unwrap();
            let _ = prolog_rm.unassign(duplicator.prolog_ddg_mut(), copy);
            duplicator.dispose(self.node);
        }
        sched
            .ddg
            .store_mut()
            .node_mut(self.node)
            .flags
            .remove(NodeFlags::PRE_LOOP_SHARED);
    }
}

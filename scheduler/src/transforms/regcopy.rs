use ttac_ddg::{DataDependenceEdge, DepType, EdgeId, EdgeKind};
use ttac_machine::RfKind;
use ttac_program::{Move, MoveNodeId, RegRef, Terminal};

use crate::{
    reversible::{run_child, undo_children, Reversible, TransformKind},
    sched::Bf2Scheduler,
    transforms::schedule::ScheduleBu,
};

/// Split an unrealizable transport through a temporary register.
///
/// When no bus connects the source to the destination, the value takes two
/// hops: `src -> tmp` and `tmp -> dst`. The copy inherits the value edges
/// of the original source; the rewritten move keeps its consumers. Both
/// halves are scheduled here, the rewritten move first (bottom-up), the
/// copy strictly below it.
pub struct RegCopyBefore {
    pub node: MoveNodeId,
    latest_bound: i32,
    copy: Option<MoveNodeId>,
    old_source: Option<Terminal>,
    moved: Vec<(DataDependenceEdge, MoveNodeId, MoveNodeId)>,
    added: Vec<EdgeId>,
}

impl RegCopyBefore {
    pub fn new(node: MoveNodeId, latest_bound: i32) -> Self {
        Self {
            node,
            latest_bound,
            copy: None,
            old_source: None,
            moved: Vec::new(),
            added: Vec::new(),
        }
    }

    /// A register file whose read ports actually reach the destination,
    /// with a scratch register to spare.
    fn scratch_register(
        sched: &Bf2Scheduler<'_>,
        node: MoveNodeId,
        avoid: Option<RegRef>,
    ) -> Option<RegRef> {
        let machine = sched.machine;
        let destination = sched.ddg.store().node(node).mov.destination;
        for (rf, desc) in machine.rfs() {
            if desc.kind != RfKind::Normal || desc.size == 0 {
                continue;
            }
            if avoid.is_some_and(|r| r.rf == rf) {
                continue;
            }
            // The hop is only useful if this file's read side reaches the
            // destination port.
            if let Terminal::FuPort { op, operand, .. } = destination {
                let reaches = machine.fus_implementing(op).any(|fu| {
                    machine
                        .fu(fu)
                        .hw_operation(op)
                        .and_then(|hw| hw.port_of(operand))
                        .is_some_and(|port| {
                            machine
                                .rf_read_ports(rf)
                                .any(|rp| !machine.buses_connecting(rp, port).is_empty())
                        })
                });
                if !reaches {
                    continue;
                }
            }
            // The top register is reserved as the connectivity scratch.
            return Some(RegRef {
                rf,
                index: (desc.size - 1) as u16,
            });
        }
        None
    }

    pub fn apply(
        &mut self,
        sched: &mut Bf2Scheduler<'_>,
        _pre: &mut Vec<Reversible>,
        post: &mut Vec<Reversible>,
    ) -> bool {
        let node = self.node;
        let n = sched.ddg.store().node(node);
        if n.is_scheduled() {
            return false;
        }
        let old_source = n.mov.source;
        let guard = n.mov.guard;
        let tmp = match Self::scratch_register(sched, node, old_source.as_register()) {
            Some(t) => t,
            None => return false,
        };
        let Some(block) = sched.ddg.block_of(node) else {
            return false;
        };

        // Create the first hop and rewire the value edges onto it.
        let copy = sched.ddg.add_move(
            Move {
                source: old_source,
                destination: Terminal::Register(tmp),
                guard,
            },
            block,
        );
        let moved_ids: Vec<EdgeId> = sched
            .ddg
            .in_edges(node)
            .filter(|(_, rec)| {
                !rec.edge.is_guard_use()
                    && rec.edge.dep == DepType::Raw
                    && rec.edge.is_register_or_ra()
            })
            .map(|(id, _)| id)
            .collect();
        for id in moved_ids {
            let (edge, tail, head) = sched.ddg.remove_edge(id);
            debug_assert_eq!(head, node);
            if let Ok(Some(new_id)) = sched.ddg.add_edge(tail, copy, edge.clone()) {
                self.added.push(new_id);
            }
            self.moved.push((edge, tail, head));
        }
        match sched.ddg.add_edge(
            copy,
            node,
            DataDependenceEdge {
                kind: EdgeKind::Register,
                dep: DepType::Raw,
                flags: Default::default(),
                data: Some(ttac_ddg::EdgeData::Register(tmp)),
                loop_distance: 0,
            },
        ) {
            Ok(Some(id)) => self.added.push(id),
            _ => {
                self.rollback_edges(sched);
                let _ = sched.ddg.drop_node(copy);
                return false;
            }
        }
        sched.ddg.store_mut().node_mut(node).mov.source = Terminal::Register(tmp);
        self.copy = Some(copy);
        self.old_source = Some(old_source);

        // The rewritten move goes in first; the copy must land strictly
        // below it to respect the hop's latency.
        let placed = run_child(
            post,
            TransformKind::ScheduleBu(ScheduleBu::conservative(node, self.latest_bound)),
            sched,
        ) && {
            let node_cycle = sched.ddg.store().node(node).cycle();
            run_child(
                post,
                TransformKind::ScheduleBu(ScheduleBu::conservative(copy, node_cycle - 1)),
                sched,
            )
        };
        if !placed {
            undo_children(post, sched);
            sched.ddg.store_mut().node_mut(node).mov.source = self.old_source.take().unwrap();
            self.copy = None;
            self.rollback_edges(sched);
            let _ = sched.ddg.drop_node(copy);
            return false;
        }
        log::trace!(target: "scheduler:regcopy", "split {node} through {tmp}");
        true
    }

    fn rollback_edges(&mut self, sched: &mut Bf2Scheduler<'_>) {
        for id in self.added.drain(..) {
            let _ = sched.ddg.remove_edge(id);
        }
        for (edge, tail, head) in self.moved.drain(..) {
            let _ = sched.ddg.add_edge(tail, head, edge);
        }
    }

    pub fn undo(&mut self, sched: &mut Bf2Scheduler<'_>) {
        let copy = self.copy.take().expect("undo of unapplied reg copy");
        sched.ddg.store_mut().node_mut(self.node).mov.source =
            self.old_source.take().expect("undo of unapplied reg copy");
        self.rollback_edges(sched);
        let _ = sched.ddg.drop_node(copy);
    }
}

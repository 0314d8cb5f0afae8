use std::collections::BTreeSet;

use ttac_ddg::Ddg;
use ttac_program::MoveNodeId;

/// Bottom-up candidate selection.
///
/// A node is ready when every successor that actually constrains it is
/// placed: all non-back-edge successors are scheduled, dead, or dropped.
/// Among ready nodes the one with the largest source distance goes first,
/// ties broken by the smaller stable id, which keeps runs deterministic.
pub struct BuSelector {
    ready: BTreeSet<MoveNodeId>,
}

impl BuSelector {
    pub fn new() -> Self {
        Self {
            ready: BTreeSet::new(),
        }
    }

    /// Seed the ready set from the graph's current state.
    pub fn initialize(&mut self, ddg: &Ddg<'_>, is_dead: impl Fn(MoveNodeId) -> bool) {
        self.ready.clear();
        for node in ddg.nodes() {
            if ddg.store().node(node).is_scheduled() || is_dead(node) {
                continue;
            }
            if Self::successors_placed(ddg, node, &is_dead) {
                self.ready.insert(node);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    fn successors_placed(
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        is_dead: &impl Fn(MoveNodeId) -> bool,
    ) -> bool {
        ddg.out_edges(node).all(|(_, rec)| {
            rec.edge.is_back_edge()
                || ddg.store().node(rec.head).is_scheduled()
                || ddg.store().node(rec.head).is_dropped()
                || is_dead(rec.head)
        })
    }

    /// The best ready candidate, removed from the set.
    pub fn select(&mut self, ddg: &Ddg<'_>) -> Option<MoveNodeId> {
        let best = self
            .ready
            .iter()
            .copied()
            .filter(|n| !ddg.store().node(*n).is_scheduled() && !ddg.store().node(*n).is_dropped())
            .max_by(|a, b| {
                ddg.max_source_distance(*a)
                    .cmp(&ddg.max_source_distance(*b))
                    // Prefer the smaller id on equal distance.
                    .then(b.cmp(a))
            })?;
        self.ready.remove(&best);
        Some(best)
    }

    /// A node was scheduled; its predecessors may have become ready.
    pub fn notify_scheduled(
        &mut self,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        is_dead: impl Fn(MoveNodeId) -> bool,
    ) {
        self.ready.remove(&node);
        for (_, rec) in ddg.in_edges(node) {
            if rec.edge.is_back_edge() {
                continue;
            }
            self.might_be_ready(ddg, rec.tail, &is_dead);
        }
    }

    /// Re-evaluate one node's readiness.
    pub fn might_be_ready(
        &mut self,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        is_dead: &impl Fn(MoveNodeId) -> bool,
    ) {
        let n = ddg.store().node(node);
        if n.is_scheduled() || n.is_dropped() || is_dead(node) {
            self.ready.remove(&node);
            return;
        }
        if Self::successors_placed(ddg, node, is_dead) {
            self.ready.insert(node);
        }
    }

    /// A node was unscheduled or resurrected; drop stale readiness of its
    /// predecessors and requeue it.
    pub fn notify_unscheduled(
        &mut self,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        is_dead: impl Fn(MoveNodeId) -> bool,
    ) {
        for (_, rec) in ddg.in_edges(node) {
            if !rec.edge.is_back_edge() {
                self.ready.remove(&rec.tail);
            }
        }
        self.might_be_ready(ddg, node, &is_dead);
    }
}

impl Default for BuSelector {
    fn default() -> Self {
        Self::new()
    }
}

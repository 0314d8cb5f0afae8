use std::collections::BTreeMap;

use ttac_ddg::Ddg;
use ttac_machine::{Machine, OperationRegistry};
use ttac_program::{BlockId, MoveGuard, MoveNodeId};
use ttac_session::AntidependenceLevel;

/// Creates prolog/epilog images of loop body moves.
///
/// The prolog graph owns its copies; a copy made for a tentative
/// assignment is dropped again when the assignment is rolled back, so the
/// mapping always reflects exactly the copies that are live.
pub struct MoveNodeDuplicator<'a> {
    prolog_ddg: Ddg<'a>,
    mapping: BTreeMap<MoveNodeId, MoveNodeId>,
}

impl<'a> MoveNodeDuplicator<'a> {
    pub fn new(machine: &'a Machine, registry: &'a OperationRegistry) -> Self {
        Self {
            prolog_ddg: Ddg::new("prolog", machine, registry, AntidependenceLevel::None),
            mapping: BTreeMap::new(),
        }
    }

    pub fn prolog_ddg(&self) -> &Ddg<'a> {
        &self.prolog_ddg
    }

    pub fn prolog_ddg_mut(&mut self) -> &mut Ddg<'a> {
        &mut self.prolog_ddg
    }

    pub fn get(&self, node: MoveNodeId) -> Option<MoveNodeId> {
        self.mapping.get(&node).copied()
    }

    /// The prolog copy of `node`, created on first use.
    ///
    /// Returns the copy and whether this call created it.
    pub fn duplicate(
        &mut self,
        body: &Ddg<'_>,
        node: MoveNodeId,
        guard: Option<MoveGuard>,
    ) -> (MoveNodeId, bool) {
        if let Some(copy) = self.mapping.get(&node) {
            return (*copy, false);
        }
        let mut mov = body.store().node(node).mov.clone();
        if let Some(g) = guard {
            mov.guard = Some(g);
        }
        let copy = self.prolog_ddg.add_move(mov, BlockId::from_u32(0));
        self.mapping.insert(node, copy);
        log::trace!(target: "scheduler:prolog", "duplicated {node} as {copy}");
        (copy, true)
    }

    /// Forget the copy of `node`, dropping it from the prolog graph.
    pub fn dispose(&mut self, node: MoveNodeId) {
        if let Some(copy) = self.mapping.remove(&node) {
            if !self.prolog_ddg.store().node(copy).is_scheduled() {
                let _ = self.prolog_ddg.drop_node(copy);
            }
        }
    }
}

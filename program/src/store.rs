use cranelift_entity::PrimaryMap;
use ttac_machine::Machine;

use crate::{
    mov::Move,
    node::{MoveNode, MoveNodeId},
    po::{PoId, ProgramOperation},
};

/// Arena holding every move node and program operation of one scheduling
/// region.
///
/// The root data-dependence graph owns the store; sub-graphs and the
/// resource manager refer into it by id. Nodes are never deallocated while
/// the store lives, so a dropped node can always be restored.
#[derive(Debug, Default)]
pub struct ProgramStore {
    nodes: PrimaryMap<MoveNodeId, MoveNode>,
    pos: PrimaryMap<PoId, ProgramOperation>,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, mov: Move) -> MoveNodeId {
        self.nodes.push(MoveNode::new(mov))
    }

    pub fn add_po(&mut self, po: ProgramOperation) -> PoId {
        self.pos.push(po)
    }

    #[inline]
    pub fn node(&self, id: MoveNodeId) -> &MoveNode {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: MoveNodeId) -> &mut MoveNode {
        &mut self.nodes[id]
    }

    #[inline]
    pub fn po(&self, id: PoId) -> &ProgramOperation {
        &self.pos[id]
    }

    #[inline]
    pub fn po_mut(&mut self, id: PoId) -> &mut ProgramOperation {
        &mut self.pos[id]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn po_count(&self) -> usize {
        self.pos.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (MoveNodeId, &MoveNode)> {
        self.nodes.iter()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = MoveNodeId> + '_ {
        self.nodes.keys()
    }

    pub fn pos(&self) -> impl Iterator<Item = (PoId, &ProgramOperation)> {
        self.pos.iter()
    }

    pub fn po_ids(&self) -> impl Iterator<Item = PoId> + '_ {
        self.pos.keys()
    }

    /// The input node writing the given 1-based operand of `po`.
    pub fn input_for_operand(&self, po: PoId, operand: u8) -> Option<MoveNodeId> {
        self.pos[po]
            .inputs
            .iter()
            .copied()
            .find(|n| self.nodes[*n].mov.destination.operation_index() == Some(operand))
    }

    /// The output node reading the given absolute operand index of `po`.
    pub fn output_for_operand(&self, po: PoId, operand: u8) -> Option<MoveNodeId> {
        self.pos[po]
            .outputs
            .iter()
            .copied()
            .find(|n| self.nodes[*n].mov.source.operation_index() == Some(operand))
    }

    /// The input that starts the operation, per the machine's port bindings.
    ///
    /// When several units implement the operation with different trigger
    /// bindings and none has been chosen yet, there is no unique answer and
    /// `None` is returned.
    pub fn trigger_input(&self, po: PoId, machine: &Machine) -> Option<MoveNodeId> {
        let desc = &self.pos[po];
        let operand = match desc.fu {
            Some(fu) => {
                let tp = machine.trigger_port(fu)?;
                machine.fu(fu).hw_operation(desc.op)?.operand_of(tp)?
            }
            None => machine.trigger_operand(desc.op)?,
        };
        self.input_for_operand(po, operand)
    }

    /// Whether `node` is the only unscheduled, non-dead input left in some
    /// operation it feeds.
    pub fn is_last_unscheduled_input(&self, node: MoveNodeId) -> bool {
        self.nodes[node].dest_ops.iter().any(|po| {
            self.pos[*po]
                .inputs
                .iter()
                .filter(|n| {
                    let n = &self.nodes[**n];
                    !n.is_scheduled() && !n.is_dead()
                })
                .count()
                == 1
                && self.pos[*po].inputs.contains(&node)
                && !self.nodes[node].is_scheduled()
        })
    }

    /// Sibling nodes of `node`: every node of every operation it belongs to.
    pub fn operation_siblings(&self, node: MoveNodeId) -> Vec<MoveNodeId> {
        let n = &self.nodes[node];
        let mut out = Vec::new();
        for po in n.source_op.iter().chain(n.dest_ops.iter()) {
            for sibling in self.pos[*po].all_nodes() {
                if sibling != node && !out.contains(&sibling) {
                    out.push(sibling);
                }
            }
        }
        out.sort_unstable();
        out
    }
}

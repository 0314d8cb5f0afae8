use cranelift_entity::{entity_impl, PrimaryMap};
use ttac_machine::{OpId, OperationRegistry};

use crate::{
    mov::{Move, MoveGuard},
    terminal::Terminal,
};

/// A basic block in a control flow graph.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);
entity_impl!(BlockId, "bb");

/// A move of a block together with its operation-instance grouping.
///
/// Moves realizing one operation instance share a group id; the DDG builder
/// turns each group into one program operation. Plain register transports
/// carry no group.
#[derive(Debug, Clone)]
pub struct BlockMove {
    pub mov: Move,
    pub group: Option<u32>,
}

/// An ordered sequence of moves, in original program order.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    moves: Vec<BlockMove>,
    next_group: u32,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn moves(&self) -> &[BlockMove] {
        &self.moves
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Append a move verbatim, preserving a grouping id from another block.
    ///
    /// Used by rewriting passes that rebuild blocks move by move.
    pub fn push_move(&mut self, mov: Move, group: Option<u32>) {
        if let Some(g) = group {
            self.next_group = self.next_group.max(g + 1);
        }
        self.moves.push(BlockMove { mov, group });
    }

    /// Append a plain transport.
    pub fn transport(&mut self, source: Terminal, destination: Terminal) {
        self.moves.push(BlockMove {
            mov: Move::new(source, destination),
            group: None,
        });
    }

    /// Append a guarded transport.
    pub fn guarded_transport(
        &mut self,
        guard: MoveGuard,
        source: Terminal,
        destination: Terminal,
    ) {
        self.moves.push(BlockMove {
            mov: Move::guarded(source, destination, guard),
            group: None,
        });
    }

    /// Append the moves of one operation instance: operand writes in operand
    /// order followed by result reads.
    ///
    /// `inputs[i]` is the value for operand `i + 1`; `outputs[k]` is the
    /// destination of output operand `inputs.len() + k + 1`.
    pub fn operation(
        &mut self,
        registry: &OperationRegistry,
        op: OpId,
        inputs: &[Terminal],
        outputs: &[Terminal],
    ) {
        self.operation_guarded(registry, op, inputs, outputs, None)
    }

    pub fn operation_guarded(
        &mut self,
        registry: &OperationRegistry,
        op: OpId,
        inputs: &[Terminal],
        outputs: &[Terminal],
        guard: Option<MoveGuard>,
    ) {
        let desc = registry.get(op);
        debug_assert_eq!(inputs.len(), desc.inputs as usize, "operand count mismatch");
        debug_assert!(outputs.len() <= desc.outputs as usize, "too many outputs");
        let group = self.next_group;
        self.next_group += 1;
        for (i, src) in inputs.iter().enumerate() {
            let operand = (i + 1) as u8;
            self.moves.push(BlockMove {
                mov: Move {
                    source: *src,
                    destination: Terminal::operand(op, operand),
                    guard,
                },
                group: Some(group),
            });
        }
        for (k, dst) in outputs.iter().enumerate() {
            let operand = desc.inputs + (k + 1) as u8;
            self.moves.push(BlockMove {
                mov: Move {
                    source: Terminal::operand(op, operand),
                    destination: *dst,
                    guard,
                },
                group: Some(group),
            });
        }
    }
}

/// Kind of a control-flow edge.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CfgEdgeKind {
    Normal,
    /// A back edge closing a loop; dependencies across it carry loop
    /// distance 1 or more.
    LoopBack,
}

/// A minimal control flow graph over basic blocks: enough structure for the
/// DDG builder to wire cross-block register dependences and to recognize a
/// single-block loop for pipelined scheduling.
#[derive(Debug, Default)]
pub struct ControlFlowGraph {
    blocks: PrimaryMap<BlockId, BasicBlock>,
    edges: Vec<(BlockId, BlockId, CfgEdgeKind)>,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&mut self, block: BasicBlock) -> BlockId {
        self.blocks.push(block)
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId, kind: CfgEdgeKind) {
        self.edges.push((from, to, kind));
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &BasicBlock)> {
        self.blocks.iter()
    }

    pub fn predecessors(&self, of: BlockId) -> impl Iterator<Item = (BlockId, CfgEdgeKind)> + '_ {
        self.edges
            .iter()
            .filter(move |(_, to, _)| *to == of)
            .map(|(from, _, kind)| (*from, *kind))
    }

    pub fn successors(&self, of: BlockId) -> impl Iterator<Item = (BlockId, CfgEdgeKind)> + '_ {
        self.edges
            .iter()
            .filter(move |(from, _, _)| *from == of)
            .map(|(_, to, kind)| (*to, *kind))
    }

    /// Whether `block` is a single-block loop: it has an edge to itself.
    pub fn is_single_block_loop(&self, block: BlockId) -> bool {
        self.edges
            .iter()
            .any(|(from, to, kind)| *from == block && *to == block && *kind == CfgEdgeKind::LoopBack)
    }
}

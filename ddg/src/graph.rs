use std::cell::RefCell;
use std::collections::BTreeMap;

use cranelift_entity::{packed_option::PackedOption, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use ttac_machine::{Machine, OperationRegistry};
use ttac_program::{
    BlockId, GuardSrc, Move, MoveNodeId, NodeFlags, PoId, ProgramOperation, ProgramStore, Terminal,
};
use ttac_session::{AntidependenceLevel, Report, ScheduleError};

use crate::{
    edge::{DataDependenceEdge, DepType, EdgeFlags, EdgeId, EdgeKind, EdgeRecord},
    liverange::LiveRangeData,
};

/// Which edge weighting the longest-path queries use.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum EdgeWeightHeuristics {
    /// Weights memory and guard dependences more, to pull the operations
    /// that are hard to place toward the critical path.
    #[default]
    Heuristic,
    /// True latencies: the height equals the minimum schedule length given
    /// unlimited resources.
    Real,
}

/// Edge classes a cycle-bound query may ignore.
#[derive(Debug, Copy, Clone, Default)]
pub struct EdgeIgnore {
    pub reg_wars: bool,
    pub reg_waws: bool,
    pub guards: bool,
    pub fu_deps: bool,
    pub same_operation: bool,
}

/// Undo record of a bypass performed with [Ddg::merge_and_keep].
#[derive(Debug)]
pub struct MergeUndo {
    pub result: MoveNodeId,
    pub user: MoveNodeId,
    pub po: PoId,
    old_source: Terminal,
    removed: Vec<(DataDependenceEdge, MoveNodeId, MoveNodeId)>,
    added: Vec<EdgeId>,
    /// Loop distance carried over from the bypassed register edge.
    pub loop_distance: u8,
}

/// Undo record of [Ddg::copy_deps_over].
#[derive(Debug, Default)]
pub struct CopiedDeps {
    pub added: Vec<EdgeId>,
}

/// Undo record of [Ddg::drop_node].
#[derive(Debug)]
pub struct DroppedNode {
    pub node: MoveNodeId,
    detached: Vec<EdgeId>,
}

/// A read-only selection of nodes and edges for reporting.
#[derive(Debug, Default)]
pub struct DdgView {
    pub nodes: Vec<MoveNodeId>,
    pub edges: Vec<EdgeId>,
}

/// The data dependence graph: a directed multigraph of move nodes with
/// typed edges, owning the program operations of its region.
///
/// Nodes and edges live in arenas owned by the graph and are referenced by
/// stable 32-bit ids; a "dropped" node stays allocated so it can be restored
/// exactly, and a removed edge record stays behind (detached) for the same
/// reason. All adjacency lists are kept sorted by edge id, so iteration
/// order never depends on mutation history.
#[derive(Debug)]
pub struct Ddg<'a> {
    pub name: String,
    machine: &'a Machine,
    registry: &'a OperationRegistry,
    antidep_level: AntidependenceLevel,
    store: ProgramStore,
    edges: PrimaryMap<EdgeId, EdgeRecord>,
    in_edges: SecondaryMap<MoveNodeId, SmallVec<[EdgeId; 4]>>,
    out_edges: SecondaryMap<MoveNodeId, SmallVec<[EdgeId; 4]>>,
    dropped: FxHashMap<MoveNodeId, Vec<EdgeId>>,
    /// Nodes indexed by their assigned cycle.
    cycle_index: BTreeMap<i32, Vec<MoveNodeId>>,
    node_block: SecondaryMap<MoveNodeId, PackedOption<BlockId>>,
    live_ranges: BTreeMap<BlockId, LiveRangeData>,
    ewh: EdgeWeightHeuristics,
    source_distances: RefCell<Option<SecondaryMap<MoveNodeId, i32>>>,
    sink_distances: RefCell<Option<SecondaryMap<MoveNodeId, i32>>>,
}

impl<'a> Ddg<'a> {
    pub fn new(
        name: impl Into<String>,
        machine: &'a Machine,
        registry: &'a OperationRegistry,
        antidep_level: AntidependenceLevel,
    ) -> Self {
        Self {
            name: name.into(),
            machine,
            registry,
            antidep_level,
            store: ProgramStore::new(),
            edges: PrimaryMap::new(),
            in_edges: SecondaryMap::new(),
            out_edges: SecondaryMap::new(),
            dropped: FxHashMap::default(),
            cycle_index: BTreeMap::new(),
            node_block: SecondaryMap::new(),
            live_ranges: BTreeMap::new(),
            ewh: EdgeWeightHeuristics::default(),
            source_distances: RefCell::new(None),
            sink_distances: RefCell::new(None),
        }
    }

    #[inline]
    pub fn machine(&self) -> &'a Machine {
        self.machine
    }

    #[inline]
    pub fn registry(&self) -> &'a OperationRegistry {
        self.registry
    }

    #[inline]
    pub fn store(&self) -> &ProgramStore {
        &self.store
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut ProgramStore {
        &mut self.store
    }

    pub fn antidep_level(&self) -> AntidependenceLevel {
        self.antidep_level
    }

    pub fn has_all_register_antidependencies(&self) -> bool {
        self.antidep_level >= AntidependenceLevel::All
    }

    pub fn has_intra_bb_register_antidependencies(&self) -> bool {
        self.antidep_level >= AntidependenceLevel::IntraBlock
    }

    // ------------------------------------------------------------------
    // Node and program operation management

    pub fn add_move(&mut self, mov: Move, block: BlockId) -> MoveNodeId {
        let id = self.store.add_node(mov);
        self.node_block[id] = Some(block).into();
        self.invalidate_path_caches();
        id
    }

    pub fn add_po(&mut self, po: ProgramOperation) -> PoId {
        self.store.add_po(po)
    }

    pub fn block_of(&self, node: MoveNodeId) -> Option<BlockId> {
        self.node_block[node].expand()
    }

    pub fn live_range(&self, block: BlockId) -> Option<&LiveRangeData> {
        self.live_ranges.get(&block)
    }

    pub fn live_range_mut(&mut self, block: BlockId) -> &mut LiveRangeData {
        self.live_ranges.entry(block).or_default()
    }

    /// Live range data of the sole block of a single-block graph.
    pub fn sole_live_range(&self) -> Option<&LiveRangeData> {
        if self.live_ranges.len() == 1 {
            self.live_ranges.values().next()
        } else {
            None
        }
    }

    pub fn node_count(&self) -> usize {
        self.store.node_count()
    }

    /// Nodes currently in the graph, ascending id, dropped nodes excluded.
    pub fn nodes(&self) -> impl Iterator<Item = MoveNodeId> + '_ {
        self.store
            .node_ids()
            .filter(move |id| !self.store.node(*id).is_dropped())
    }

    // ------------------------------------------------------------------
    // Edge management

    /// Install an edge, unless an equal edge between the same endpoints
    /// already exists.
    ///
    /// Creating an intra-iteration edge that would close a cycle is a
    /// programming error and is rejected with the offending node identity.
    pub fn add_edge(
        &mut self,
        tail: MoveNodeId,
        head: MoveNodeId,
        edge: DataDependenceEdge,
    ) -> Result<Option<EdgeId>, ScheduleError> {
        if self.has_equal_edge(tail, head, &edge) {
            return Ok(None);
        }
        if edge.loop_distance == 0 && (tail == head || self.reaches(head, tail)) {
            return Err(ScheduleError::invariant(
                head.as_u32(),
                format!("edge {tail} -> {head} ({edge}) would close a dependence cycle"),
            ));
        }
        let id = self.edges.push(EdgeRecord {
            edge,
            tail,
            head,
            detached: false,
        });
        Self::attach(&mut self.out_edges[tail], id);
        Self::attach(&mut self.in_edges[head], id);
        self.invalidate_path_caches();
        Ok(Some(id))
    }

    fn attach(list: &mut SmallVec<[EdgeId; 4]>, id: EdgeId) {
        if let Err(pos) = list.binary_search(&id) {
            list.insert(pos, id);
        }
    }

    fn detach(list: &mut SmallVec<[EdgeId; 4]>, id: EdgeId) {
        if let Ok(pos) = list.binary_search(&id) {
            list.remove(pos);
        }
    }

    /// Detach an edge, returning its content for a later re-add.
    pub fn remove_edge(&mut self, id: EdgeId) -> (DataDependenceEdge, MoveNodeId, MoveNodeId) {
        let (tail, head) = {
            let rec = &mut self.edges[id];
            debug_assert!(!rec.detached, "edge {id} already detached");
            rec.detached = true;
            (rec.tail, rec.head)
        };
        Self::detach(&mut self.out_edges[tail], id);
        Self::detach(&mut self.in_edges[head], id);
        self.invalidate_path_caches();
        (self.edges[id].edge.clone(), tail, head)
    }

    pub fn edge(&self, id: EdgeId) -> &EdgeRecord {
        &self.edges[id]
    }

    pub fn has_equal_edge(
        &self,
        tail: MoveNodeId,
        head: MoveNodeId,
        edge: &DataDependenceEdge,
    ) -> bool {
        self.out_edges[tail].iter().any(|e| {
            let rec = &self.edges[*e];
            rec.head == head && &rec.edge == edge
        })
    }

    pub fn in_edges(&self, node: MoveNodeId) -> impl Iterator<Item = (EdgeId, &EdgeRecord)> + '_ {
        self.in_edges[node].iter().map(move |e| (*e, &self.edges[*e]))
    }

    pub fn out_edges(&self, node: MoveNodeId) -> impl Iterator<Item = (EdgeId, &EdgeRecord)> + '_ {
        self.out_edges[node].iter().map(move |e| (*e, &self.edges[*e]))
    }

    pub fn in_degree(&self, node: MoveNodeId) -> usize {
        self.in_edges[node].len()
    }

    pub fn out_degree(&self, node: MoveNodeId) -> usize {
        self.out_edges[node].len()
    }

    /// All edges currently attached, ascending id.
    pub fn edge_records(&self) -> impl Iterator<Item = (EdgeId, &EdgeRecord)> + '_ {
        self.edges.iter().filter(|(_, rec)| !rec.detached)
    }

    /// Whether `from` reaches `to` along non-back edges.
    fn reaches(&self, from: MoveNodeId, to: MoveNodeId) -> bool {
        if from == to {
            return true;
        }
        let mut visited: Vec<MoveNodeId> = Vec::new();
        let mut worklist = vec![from];
        while let Some(n) = worklist.pop() {
            for e in self.out_edges[n].iter() {
                let rec = &self.edges[*e];
                if rec.edge.is_back_edge() {
                    continue;
                }
                if rec.head == to {
                    return true;
                }
                if !visited.contains(&rec.head) {
                    visited.push(rec.head);
                    worklist.push(rec.head);
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Drop and restore

    /// Remove a node from the graph but keep it alive so it can be restored.
    ///
    /// The node must be unscheduled; the resource assignment is a separate
    /// concern and must be released first.
    pub fn drop_node(&mut self, node: MoveNodeId) -> DroppedNode {
        debug_assert!(!self.store.node(node).is_scheduled(), "drop of a scheduled node");
        debug_assert!(!self.store.node(node).is_dropped(), "node {node} already dropped");
        let mut detached: Vec<EdgeId> = Vec::new();
        detached.extend(self.in_edges[node].iter().copied());
        detached.extend(self.out_edges[node].iter().copied());
        detached.sort_unstable();
        for id in &detached {
            let (tail, head) = {
                let rec = &mut self.edges[*id];
                rec.detached = true;
                (rec.tail, rec.head)
            };
            Self::detach(&mut self.out_edges[tail], *id);
            Self::detach(&mut self.in_edges[head], *id);
        }
        self.store.node_mut(node).flags.insert(NodeFlags::DROPPED);
        self.dropped.insert(node, detached.clone());
        self.invalidate_path_caches();
        log::trace!(target: "ddg", "dropped {node} with {} edges", detached.len());
        DroppedNode { node, detached }
    }

    /// Reinstate a dropped node and every edge it had when dropped.
    pub fn restore_node(&mut self, undo: DroppedNode) {
        let DroppedNode { node, detached } = undo;
        debug_assert!(self.store.node(node).is_dropped());
        for id in detached {
            let (tail, head) = {
                let rec = &mut self.edges[id];
                rec.detached = false;
                (rec.tail, rec.head)
            };
            Self::attach(&mut self.out_edges[tail], id);
            Self::attach(&mut self.in_edges[head], id);
        }
        self.store.node_mut(node).flags.remove(NodeFlags::DROPPED);
        self.dropped.remove(&node);
        self.invalidate_path_caches();
    }

    // ------------------------------------------------------------------
    // Scheduling state

    pub fn schedule_node(&mut self, node: MoveNodeId, cycle: i32) {
        self.store.node_mut(node).set_cycle(cycle);
        self.cycle_index.entry(cycle).or_default().push(node);
        self.cycle_index.get_mut(&cycle).unwrap().sort_unstable();
    }

    pub fn unschedule_node(&mut self, node: MoveNodeId) {
        let cycle = self.store.node(node).cycle();
        self.store.node_mut(node).unset_cycle();
        if let Some(list) = self.cycle_index.get_mut(&cycle) {
            list.retain(|n| *n != node);
            if list.is_empty() {
                self.cycle_index.remove(&cycle);
            }
        }
    }

    pub fn moves_at_cycle(&self, cycle: i32) -> &[MoveNodeId] {
        self.cycle_index.get(&cycle).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn smallest_cycle(&self) -> Option<i32> {
        self.cycle_index.keys().next().copied()
    }

    pub fn largest_cycle(&self) -> Option<i32> {
        self.cycle_index.keys().next_back().copied()
    }

    pub fn scheduled_node_count(&self) -> usize {
        self.cycle_index.values().map(|v| v.len()).sum()
    }

    pub fn unscheduled_moves(&self) -> Vec<MoveNodeId> {
        self.nodes()
            .filter(|n| !self.store.node(*n).is_scheduled())
            .collect()
    }

    // ------------------------------------------------------------------
    // Latency and cycle-bound queries

    /// Latency an edge imposes between its endpoints' cycles.
    ///
    /// For a back edge with loop distance `k` the initiation interval is
    /// subtracted `k` times, expressing that the head belongs to a later
    /// iteration.
    pub fn edge_latency(&self, rec: &EdgeRecord, ii: u32) -> i32 {
        let base: i32 = match rec.edge.kind {
            EdgeKind::Operation => match rec.edge.dep {
                // Operand write may share the trigger's cycle.
                DepType::Trigger => 0,
                // Trigger to result read: the output's latency.
                _ => {
                    let head = self.store.node(rec.head);
                    let latency = head
                        .mov
                        .source
                        .operation_index()
                        .zip(head.source_op)
                        .map(|(idx, po)| {
                            self.registry.get(self.store.po(po).op).latency(idx) as i32
                        })
                        .unwrap_or(1);
                    latency
                }
            },
            EdgeKind::Register | EdgeKind::ReturnAddress => {
                if rec.edge.is_guard_use() {
                    self.guard_latency_of(rec.head)
                } else {
                    match rec.edge.dep {
                        DepType::War => 0,
                        _ => 1,
                    }
                }
            }
            EdgeKind::Memory => match rec.edge.dep {
                DepType::War => 0,
                _ => 1,
            },
            EdgeKind::FuState => 1,
        };
        base - (rec.edge.loop_distance as i32) * (ii as i32)
    }

    /// Guard observation latency of a node's guard, register file plus
    /// global component.
    fn guard_latency_of(&self, node: MoveNodeId) -> i32 {
        let global = self.machine.control_unit().global_guard_latency as i32;
        match self.store.node(node).mov.guard {
            Some(g) => match g.source {
                GuardSrc::Register(r) => self.machine.rf(r.rf).guard_latency as i32 + global,
                GuardSrc::FuPort { .. } => global.max(1),
            },
            None => 1,
        }
    }

    fn ignored(&self, rec: &EdgeRecord, ignore: EdgeIgnore) -> bool {
        if ignore.guards && rec.edge.is_guard_use() {
            return true;
        }
        if ignore.fu_deps && rec.edge.kind == EdgeKind::FuState {
            return true;
        }
        if ignore.same_operation && rec.edge.kind == EdgeKind::Operation {
            return true;
        }
        if rec.edge.kind == EdgeKind::Register {
            if ignore.reg_wars && rec.edge.dep == DepType::War {
                return true;
            }
            if ignore.reg_waws && rec.edge.dep == DepType::Waw {
                return true;
            }
        }
        false
    }

    /// Earliest cycle the dependences allow for `node`: the max over
    /// incoming edges from scheduled tails of `cycle(tail) + latency`.
    ///
    /// `None` when no incoming edge constrains the node.
    pub fn earliest_cycle(&self, node: MoveNodeId, ii: u32, ignore: EdgeIgnore) -> Option<i32> {
        let mut earliest: Option<i32> = None;
        for (_, rec) in self.in_edges(node) {
            if self.ignored(rec, ignore) {
                continue;
            }
            if ii == 0 && rec.edge.is_back_edge() {
                continue;
            }
            let tail = self.store.node(rec.tail);
            let Some(tc) = tail.cycle else { continue };
            let bound = tc + self.edge_latency(rec, ii);
            earliest = Some(earliest.map_or(bound, |e| e.max(bound)));
        }
        earliest
    }

    /// Latest cycle the dependences allow: min over outgoing edges into
    /// scheduled heads of `cycle(head) - latency`.
    pub fn latest_cycle(&self, node: MoveNodeId, ii: u32, ignore: EdgeIgnore) -> Option<i32> {
        let mut latest: Option<i32> = None;
        for (_, rec) in self.out_edges(node) {
            if self.ignored(rec, ignore) {
                continue;
            }
            if ii == 0 && rec.edge.is_back_edge() {
                continue;
            }
            let head = self.store.node(rec.head);
            let Some(hc) = head.cycle else { continue };
            let bound = hc - self.edge_latency(rec, ii);
            latest = Some(latest.map_or(bound, |l| l.min(bound)));
        }
        latest
    }

    // ------------------------------------------------------------------
    // Longest path queries

    pub fn set_edge_weight_heuristics(&mut self, ewh: EdgeWeightHeuristics) {
        if self.ewh != ewh {
            self.invalidate_path_caches();
        }
        self.ewh = ewh;
    }

    pub fn edge_weight(&self, rec: &EdgeRecord) -> i32 {
        let real = self.edge_latency(rec, 0);
        match self.ewh {
            EdgeWeightHeuristics::Real => real,
            EdgeWeightHeuristics::Heuristic => {
                let mut w = real;
                if rec.edge.kind == EdgeKind::Memory {
                    w += 2;
                }
                if rec.edge.is_guard_use() {
                    w += 1;
                }
                w
            }
        }
    }

    fn invalidate_path_caches(&self) {
        self.source_distances.borrow_mut().take();
        self.sink_distances.borrow_mut().take();
    }

    /// Topological order over attached non-back edges, dropped nodes
    /// excluded.
    fn topo_order(&self) -> Vec<MoveNodeId> {
        let mut indeg: SecondaryMap<MoveNodeId, u32> = SecondaryMap::new();
        let mut order = Vec::with_capacity(self.store.node_count());
        let mut ready: Vec<MoveNodeId> = Vec::new();
        for node in self.nodes() {
            let d = self
                .in_edges(node)
                .filter(|(_, rec)| !rec.edge.is_back_edge())
                .count() as u32;
            indeg[node] = d;
            if d == 0 {
                ready.push(node);
            }
        }
        // Pop smallest id first for determinism.
        while let Some(pos) = ready.iter().enumerate().min_by_key(|(_, n)| **n).map(|(i, _)| i) {
            let node = ready.swap_remove(pos);
            order.push(node);
            for (_, rec) in self.out_edges(node) {
                if rec.edge.is_back_edge() {
                    continue;
                }
                indeg[rec.head] -= 1;
                if indeg[rec.head] == 0 {
                    ready.push(rec.head);
                }
            }
        }
        order
    }

    /// Longest weighted path from any source to `node`.
    pub fn max_source_distance(&self, node: MoveNodeId) -> i32 {
        if self.source_distances.borrow().is_none() {
            let mut dist: SecondaryMap<MoveNodeId, i32> = SecondaryMap::new();
            for n in self.topo_order() {
                let mut best = 0;
                for (_, rec) in self.in_edges(n) {
                    if rec.edge.is_back_edge() {
                        continue;
                    }
                    best = best.max(dist[rec.tail] + self.edge_weight(rec));
                }
                dist[n] = best;
            }
            *self.source_distances.borrow_mut() = Some(dist);
        }
        self.source_distances.borrow().as_ref().unwrap()[node]
    }

    /// Longest weighted path from `node` to any sink.
    pub fn max_sink_distance(&self, node: MoveNodeId) -> i32 {
        if self.sink_distances.borrow().is_none() {
            let mut dist: SecondaryMap<MoveNodeId, i32> = SecondaryMap::new();
            for n in self.topo_order().into_iter().rev() {
                let mut best = 0;
                for (_, rec) in self.out_edges(n) {
                    if rec.edge.is_back_edge() {
                        continue;
                    }
                    best = best.max(dist[rec.head] + self.edge_weight(rec));
                }
                dist[n] = best;
            }
            *self.sink_distances.borrow_mut() = Some(dist);
        }
        self.sink_distances.borrow().as_ref().unwrap()[node]
    }

    /// Length of the longest weighted path in the graph.
    pub fn height(&self) -> i32 {
        self.nodes().map(|n| self.max_source_distance(n)).max().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Register dependence helpers

    /// The unique register RAW producer of `node`'s source value, if there
    /// is exactly one and it is not reached over more back edges than
    /// `max_back_edges`.
    pub fn only_register_raw_source(
        &self,
        node: MoveNodeId,
        allow_guard_edges: bool,
        max_back_edges: u8,
    ) -> Option<MoveNodeId> {
        let mut found: Option<MoveNodeId> = None;
        for (_, rec) in self.in_edges(node) {
            if !rec.edge.is_register_or_ra() || rec.edge.dep != DepType::Raw {
                continue;
            }
            if rec.edge.is_guard_use() {
                if !allow_guard_edges {
                    continue;
                }
            }
            if rec.edge.loop_distance > max_back_edges {
                return None;
            }
            if found.is_some() {
                return None;
            }
            found = Some(rec.tail);
        }
        found
    }

    /// Register RAW consumers of the value `node` writes.
    pub fn register_raw_destinations(
        &self,
        node: MoveNodeId,
        allow_guard_edges: bool,
        allow_back_edges: bool,
    ) -> Vec<MoveNodeId> {
        let mut out = Vec::new();
        for (_, rec) in self.out_edges(node) {
            if !rec.edge.is_register_or_ra() || rec.edge.dep != DepType::Raw {
                continue;
            }
            if rec.edge.is_guard_use() && !allow_guard_edges {
                continue;
            }
            if rec.edge.is_back_edge() && !allow_back_edges {
                continue;
            }
            out.push(rec.head);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Nodes whose written value `node` consumes through its guard.
    pub fn guard_raw_predecessors(&self, node: MoveNodeId) -> Vec<MoveNodeId> {
        let mut out: Vec<MoveNodeId> = self
            .in_edges(node)
            .filter(|(_, rec)| rec.edge.is_guard_use() && rec.edge.dep == DepType::Raw)
            .map(|(_, rec)| rec.tail)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// The sole guard-RAW definition of `node`'s guard, if unique.
    pub fn only_guard_def(&self, node: MoveNodeId) -> Option<MoveNodeId> {
        let preds = self.guard_raw_predecessors(node);
        match preds.as_slice() {
            [one] => Some(*one),
            _ => None,
        }
    }

    /// Whether the guards of two moves can never both be true.
    pub fn exclusive_guards(&self, a: MoveNodeId, b: MoveNodeId) -> bool {
        match (&self.store.node(a).mov.guard, &self.store.node(b).mov.guard) {
            (Some(ga), Some(gb)) => ga.excludes(gb),
            _ => false,
        }
    }

    pub fn same_guards(&self, a: MoveNodeId, b: MoveNodeId) -> bool {
        self.store.node(a).mov.guard == self.store.node(b).mov.guard
    }

    /// Whether the value flowing from `def` to `user` survives a bypass:
    /// either the producer is unconditional, or both moves are predicated
    /// identically. A loop bypass additionally requires the guard to be
    /// loop-invariant, which reduces to the same-guard check here because
    /// the jump guard write itself is excluded by the caller.
    pub fn guards_allow_bypass(
        &self,
        def: MoveNodeId,
        user: MoveNodeId,
        _loop_bypass: bool,
    ) -> bool {
        let def_node = self.store.node(def);
        if def_node.mov.is_unconditional() {
            return true;
        }
        self.same_guards(def, user)
    }

    /// Whether any write to the register of `def` could land between `def`
    /// and `user` cycles, invalidating a bypass. Conservative: any other
    /// unscheduled writer of the register counts.
    pub fn intervening_write(&self, def: MoveNodeId, user: MoveNodeId) -> bool {
        let Some(reg) = self.store.node(def).mov.destination.as_register() else {
            return false;
        };
        for (_, rec) in self.out_edges(def) {
            if rec.edge.kind == EdgeKind::Register
                && rec.edge.dep == DepType::Waw
                && rec.edge.data_register() == Some(reg)
                && rec.head != user
            {
                let head = self.store.node(rec.head);
                let user_node = self.store.node(user);
                match (head.cycle, user_node.cycle) {
                    (Some(hc), Some(uc)) if hc > uc => {}
                    _ => return true,
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Bypass (merge) support

    /// Whether `user` may be rewritten to read the FU result feeding
    /// `result` directly.
    pub fn merge_and_keep_allowed(&self, result: MoveNodeId, user: MoveNodeId) -> bool {
        let result_node = self.store.node(result);
        let user_node = self.store.node(user);
        if result_node.source_op.is_none() {
            return false;
        }
        let Some(reg) = result_node.mov.destination.as_register() else {
            return false;
        };
        if user_node.mov.source.as_register() != Some(reg) {
            return false;
        }
        // The only RAW source of the user must be this result.
        if self.only_register_raw_source(user, false, 1) != Some(result) {
            return false;
        }
        let loop_bypass = self.is_loop_bypass(result, user);
        if !self.guards_allow_bypass(result, user, loop_bypass) {
            return false;
        }
        true
    }

    /// Whether the register value flows over a one-iteration back edge.
    pub fn is_loop_bypass(&self, result: MoveNodeId, user: MoveNodeId) -> bool {
        self.out_edges(result).any(|(_, rec)| {
            rec.head == user
                && rec.edge.kind == EdgeKind::Register
                && rec.edge.dep == DepType::Raw
                && rec.edge.is_back_edge()
        })
    }

    /// Rewrite `user` to read the FU output feeding `result`, making it an
    /// additional result read of the producing operation.
    ///
    /// Fails with no state change when the rewrite is not allowed.
    pub fn merge_and_keep(&mut self, result: MoveNodeId, user: MoveNodeId) -> Option<MergeUndo> {
        if !self.merge_and_keep_allowed(result, user) {
            return None;
        }
        let po = self.store.node(result).source_op.unwrap();
        let reg = self.store.node(result).mov.destination.as_register().unwrap();
        let new_source = self.store.node(result).mov.source;

        // Detach the bypassed register RAW edge(s) and the user's WAR edges
        // for the register it no longer reads.
        let mut to_remove: Vec<EdgeId> = Vec::new();
        let mut loop_distance = 0;
        for (id, rec) in self.in_edges(user) {
            if rec.tail == result
                && rec.edge.kind == EdgeKind::Register
                && rec.edge.dep == DepType::Raw
                && !rec.edge.is_guard_use()
                && rec.edge.data_register() == Some(reg)
            {
                loop_distance = rec.edge.loop_distance;
                to_remove.push(id);
            }
        }
        for (id, rec) in self.out_edges(user) {
            if rec.edge.kind == EdgeKind::Register
                && rec.edge.dep == DepType::War
                && !rec.edge.is_guard_use()
                && rec.edge.data_register() == Some(reg)
            {
                to_remove.push(id);
            }
        }
        to_remove.sort_unstable();
        to_remove.dedup();
        let mut removed = Vec::with_capacity(to_remove.len());
        for id in to_remove {
            let (edge, tail, head) = self.remove_edge(id);
            removed.push((edge, tail, head));
        }

        // The user now reads the result straight off the operation: carry
        // the trigger-to-result edges over, preserving the loop distance of
        // the bypassed value edge.
        let op_in: Vec<(MoveNodeId, DataDependenceEdge)> = self
            .in_edges(result)
            .filter(|(_, rec)| rec.edge.kind == EdgeKind::Operation && !rec.edge.is_back_edge())
            .map(|(_, rec)| (rec.tail, rec.edge.clone()))
            .collect();
        let mut added = Vec::new();
        for (tail, mut edge) in op_in {
            edge.loop_distance = loop_distance;
            if let Ok(Some(id)) = self.add_edge(tail, user, edge) {
                added.push(id);
            }
        }

        let old_source = self.store.node(user).mov.source;
        self.store.node_mut(user).mov.source = new_source;
        self.store.node_mut(user).source_op = Some(po);
        self.store.po_mut(po).outputs.push(user);
        self.invalidate_path_caches();
        log::trace!(target: "ddg", "bypassed {result} -> {user} (po {po}, ld {loop_distance})");

        Some(MergeUndo {
            result,
            user,
            po,
            old_source,
            removed,
            added,
            loop_distance,
        })
    }

    /// Exact inverse of [Ddg::merge_and_keep].
    pub fn unmerge(&mut self, undo: MergeUndo) {
        let MergeUndo {
            user,
            po,
            old_source,
            removed,
            added,
            ..
        } = undo;
        for id in added {
            let _ = self.remove_edge(id);
        }
        for (edge, tail, head) in removed {
            self.add_edge(tail, head, edge).expect("re-adding removed edge cannot cycle");
        }
        self.store.node_mut(user).mov.source = old_source;
        self.store.node_mut(user).source_op = None;
        let outputs = &mut self.store.po_mut(po).outputs;
        if let Some(pos) = outputs.iter().position(|n| *n == user) {
            outputs.remove(pos);
        }
        self.invalidate_path_caches();
    }

    /// Whether the value written by `node` still has a consumer: a RAW or
    /// return-address successor, or liveness out of the block.
    pub fn result_used(&self, node: MoveNodeId) -> bool {
        for (_, rec) in self.out_edges(node) {
            if rec.edge.dep == DepType::Raw && rec.edge.is_register_or_ra() {
                return true;
            }
        }
        let Some(reg) = self.store.node(node).mov.destination.as_register() else {
            return false;
        };
        let Some(block) = self.block_of(node) else {
            return false;
        };
        match self.live_ranges.get(&block) {
            Some(lr) if lr.is_live_out(reg) => !self.has_unconditional_waw_successor(node),
            _ => false,
        }
    }

    fn has_unconditional_waw_successor(&self, node: MoveNodeId) -> bool {
        self.out_edges(node).any(|(_, rec)| {
            rec.edge.kind == EdgeKind::Register
                && rec.edge.dep == DepType::Waw
                && !rec.edge.is_back_edge()
                && self.store.node(rec.head).mov.is_unconditional()
        })
    }

    /// Bridge dependences around `node` before dropping it, so the ordering
    /// it mediated survives.
    pub fn copy_deps_over(&mut self, node: MoveNodeId, anti: bool, raw: bool) -> CopiedDeps {
        let mut planned: Vec<(MoveNodeId, MoveNodeId, DataDependenceEdge)> = Vec::new();
        let ins: Vec<(MoveNodeId, DataDependenceEdge)> = self
            .in_edges(node)
            .filter(|(_, rec)| rec.edge.kind == EdgeKind::Register)
            .map(|(_, rec)| (rec.tail, rec.edge.clone()))
            .collect();
        let outs: Vec<(MoveNodeId, DataDependenceEdge)> = self
            .out_edges(node)
            .filter(|(_, rec)| rec.edge.kind == EdgeKind::Register)
            .map(|(_, rec)| (rec.head, rec.edge.clone()))
            .collect();
        for (tail, ein) in &ins {
            for (head, eout) in &outs {
                if tail == head {
                    continue;
                }
                let distance = (ein.loop_distance as u32 + eout.loop_distance as u32).min(255) as u8;
                if raw && ein.dep == DepType::Raw && eout.dep == DepType::Raw {
                    // Value flows through: tail defines what head reads.
                    let mut e = ein.clone();
                    e.loop_distance = distance;
                    e.flags |= eout.flags & EdgeFlags::GUARD;
                    planned.push((*tail, *head, e));
                }
                if anti {
                    if ein.dep == DepType::Waw && eout.dep == DepType::Waw {
                        let mut e = ein.clone();
                        e.loop_distance = distance;
                        planned.push((*tail, *head, e));
                    }
                    if ein.dep == DepType::War && eout.dep == DepType::Waw {
                        let mut e = ein.clone();
                        e.loop_distance = distance;
                        planned.push((*tail, *head, e));
                    }
                    if ein.dep == DepType::Waw && eout.dep == DepType::War {
                        // Earlier write vs later read of the overwritten
                        // value: nothing to preserve once `node` is gone.
                    }
                }
            }
        }
        let mut added = Vec::new();
        for (tail, head, edge) in planned {
            if let Ok(Some(id)) = self.add_edge(tail, head, edge) {
                added.push(id);
            }
        }
        CopiedDeps { added }
    }

    /// Revert [Ddg::copy_deps_over].
    pub fn remove_copied_deps(&mut self, undo: CopiedDeps) {
        for id in undo.added {
            let _ = self.remove_edge(id);
        }
    }

    // ------------------------------------------------------------------
    // Reporting sub-graphs

    /// The nodes/edges of the sub-graph induced by `nodes`.
    pub fn subgraph(&self, nodes: &[MoveNodeId]) -> DdgView {
        let mut view = DdgView {
            nodes: nodes.to_vec(),
            edges: Vec::new(),
        };
        view.nodes.sort_unstable();
        view.nodes.dedup();
        for (id, rec) in self.edge_records() {
            if view.nodes.binary_search(&rec.tail).is_ok()
                && view.nodes.binary_search(&rec.head).is_ok()
            {
                view.edges.push(id);
            }
        }
        view
    }

    /// Only true dependences: no register or memory antidependences.
    pub fn true_dependence_graph(&self, ignore_mem_deps: bool) -> DdgView {
        let mut view = DdgView {
            nodes: self.nodes().collect(),
            edges: Vec::new(),
        };
        for (id, rec) in self.edge_records() {
            if rec.edge.is_false_dep() {
                continue;
            }
            if ignore_mem_deps && rec.edge.kind == EdgeKind::Memory {
                continue;
            }
            view.edges.push(id);
        }
        view
    }

    /// Only memory dependences.
    pub fn memory_dependence_graph(&self) -> DdgView {
        let mut view = DdgView::default();
        for (id, rec) in self.edge_records() {
            if rec.edge.kind == EdgeKind::Memory {
                view.edges.push(id);
                view.nodes.push(rec.tail);
                view.nodes.push(rec.head);
            }
        }
        view.nodes.sort_unstable();
        view.nodes.dedup();
        view
    }

    /// Nodes and edges lying on some longest source-to-sink path.
    pub fn critical_path_graph(&self) -> DdgView {
        let height = self.height();
        let mut view = DdgView::default();
        for node in self.nodes() {
            if self.max_source_distance(node) + self.max_sink_distance(node) == height {
                view.nodes.push(node);
            }
        }
        for (id, rec) in self.edge_records() {
            if rec.edge.is_back_edge() {
                continue;
            }
            let on_path = self.max_source_distance(rec.tail)
                + self.edge_weight(rec)
                + self.max_sink_distance(rec.head)
                == height;
            if on_path
                && view.nodes.binary_search(&rec.tail).is_ok()
                && view.nodes.binary_search(&rec.head).is_ok()
            {
                view.edges.push(id);
            }
        }
        view
    }

    // ------------------------------------------------------------------
    // Verification

    /// Structural self-check used by tests and debug builds.
    pub fn sanity_check(&self) -> Result<(), Report> {
        for (id, rec) in self.edge_records() {
            if self.store.node(rec.tail).is_dropped() || self.store.node(rec.head).is_dropped() {
                return Err(Report::msg(format!(
                    "edge {id} touches a dropped node ({} -> {})",
                    rec.tail, rec.head
                )));
            }
            if !self.out_edges[rec.tail].contains(&id) || !self.in_edges[rec.head].contains(&id) {
                return Err(Report::msg(format!("edge {id} missing from adjacency lists")));
            }
        }
        for node in self.nodes() {
            if let Some(cycle) = self.store.node(node).cycle {
                let at = self.moves_at_cycle(cycle);
                if !at.contains(&node) {
                    return Err(Report::msg(format!(
                        "node {node} scheduled at {cycle} missing from cycle index"
                    )));
                }
            }
            for (_, rec) in self.in_edges(node) {
                if rec.edge.loop_distance == 0 {
                    let (tc, hc) = (
                        self.store.node(rec.tail).cycle,
                        self.store.node(rec.head).cycle,
                    );
                    if let (Some(tc), Some(hc)) = (tc, hc) {
                        if tc + self.edge_latency(rec, 0) > hc {
                            return Err(Report::msg(format!(
                                "dependence violated: {} @{tc} -> {} @{hc} ({})",
                                rec.tail, rec.head, rec.edge
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

use std::collections::BTreeMap;

use ttac_ddg::Ddg;
use ttac_machine::{
    BusId, FuId, GuardSource, ImmUnitId, Machine, MachineInfo, OperationRegistry, PortId, RfId,
    TemplateId,
};
use ttac_program::{
    GuardSrc, Instruction, InstructionStream, MoveNodeId, PoId, ScheduledMove, Terminal,
};
use ttac_session::{ScheduleError, PROLOG_CYCLE_BIAS};

/// Optional constraints a caller may pin on an assignment attempt.
///
/// Unset fields are chosen by the manager; set fields are honored or the
/// attempt fails. The prolog fields are carried for the scheduler's loop
/// wrappers, which mirror assignments into a prolog manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssignOpts {
    pub bus: Option<BusId>,
    pub src_fu: Option<FuId>,
    pub dst_fu: Option<FuId>,
    pub prolog_bus: Option<BusId>,
    pub imm_write_cycle: Option<i32>,
    pub prolog_imm_write_cycle: Option<i32>,
    pub imm_unit: Option<ImmUnitId>,
    pub imm_index: Option<u16>,
}

/// The exact resources one assigned move occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub cycle: i32,
    pub bus: BusId,
    pub src_fu: Option<FuId>,
    pub dst_fu: Option<FuId>,
    pub src_port: Option<PortId>,
    pub dst_port: Option<PortId>,
    pub rf_read: Option<RfId>,
    pub rf_write: Option<RfId>,
    /// Long-immediate staging, when the source constant needed a template.
    pub imm_unit: Option<ImmUnitId>,
    pub imm_index: Option<u16>,
    pub imm_write_cycle: Option<i32>,
    pub template: Option<TemplateId>,
    /// Program operations whose FU binding this assignment established.
    bound_pos: smallvec::SmallVec<[PoId; 2]>,
}

/// Occupancy of one (modulo) cycle.
#[derive(Debug, Clone, Default)]
struct CycleState {
    bus_used: BTreeMap<BusId, MoveNodeId>,
    fu_trigger: BTreeMap<FuId, MoveNodeId>,
    port_writes: BTreeMap<PortId, MoveNodeId>,
    port_reads: BTreeMap<PortId, MoveNodeId>,
    rf_reads: BTreeMap<RfId, u32>,
    rf_writes: BTreeMap<RfId, u32>,
    /// The instruction template in effect, with a slot-use count.
    template: Option<(TemplateId, u32)>,
    imm_writes: BTreeMap<ImmUnitId, u32>,
}

/// Assigns moves to cycles, buses, function units and immediate slots, and
/// takes assignments back, restoring the exact prior occupancy.
///
/// With a non-zero initiation interval, occupancy is taken modulo II, so a
/// kernel conflict at cycle `c` is also a conflict at `c + II`. Cycles at or
/// above [PROLOG_CYCLE_BIAS] belong to the prolog/epilog image and are
/// never taken modulo.
#[derive(Debug)]
pub struct ResourceManager<'a> {
    machine: &'a Machine,
    registry: &'a OperationRegistry,
    ii: u32,
    cycles: BTreeMap<i32, CycleState>,
    assignments: BTreeMap<MoveNodeId, Assignment>,
}

impl<'a> ResourceManager<'a> {
    pub fn new(machine: &'a Machine, registry: &'a OperationRegistry) -> Self {
        Self {
            machine,
            registry,
            ii: 0,
            cycles: BTreeMap::new(),
            assignments: BTreeMap::new(),
        }
    }

    pub fn with_initiation_interval(mut self, ii: u32) -> Self {
        self.ii = ii;
        self
    }

    pub fn initiation_interval(&self) -> u32 {
        self.ii
    }

    pub fn machine(&self) -> &'a Machine {
        self.machine
    }

    pub fn registry(&self) -> &'a OperationRegistry {
        self.registry
    }

    /// The cycle key resource occupancy is recorded under.
    fn slot(&self, cycle: i32) -> i32 {
        if self.ii > 0 && cycle < PROLOG_CYCLE_BIAS {
            cycle.rem_euclid(self.ii as i32)
        } else {
            cycle
        }
    }

    pub fn is_assigned(&self, node: MoveNodeId) -> bool {
        self.assignments.contains_key(&node)
    }

    pub fn assignment(&self, node: MoveNodeId) -> Option<&Assignment> {
        self.assignments.get(&node)
    }

    /// Smallest actual cycle holding an assignment, prolog image excluded.
    pub fn smallest_cycle(&self) -> Option<i32> {
        self.assignments
            .values()
            .map(|a| a.cycle)
            .filter(|c| *c < PROLOG_CYCLE_BIAS)
            .min()
    }

    pub fn largest_cycle(&self) -> Option<i32> {
        self.assignments
            .values()
            .map(|a| a.cycle)
            .filter(|c| *c < PROLOG_CYCLE_BIAS)
            .max()
    }

    pub fn assigned_node_count(&self) -> usize {
        self.assignments.len()
    }

    // ------------------------------------------------------------------
    // Planning

    /// Whether `node` can be placed at `cycle` under `opts`.
    pub fn can_assign(&self, cycle: i32, ddg: &Ddg<'_>, node: MoveNodeId, opts: AssignOpts) -> bool {
        self.plan(cycle, ddg, node, opts).is_some()
    }

    /// Whether any immediate encoding can carry the node's constant source.
    pub fn can_transport_immediate(&self, ddg: &Ddg<'_>, node: MoveNodeId) -> bool {
        match ddg.store().node(node).mov.source {
            Terminal::Immediate { value, width } => {
                MachineInfo::can_encode_immediate_integer(self.machine, value, width)
            }
            _ => true,
        }
    }

    /// The staged-immediate write cycle of an assigned node, if it used one.
    pub fn immediate_write_cycle(&self, node: MoveNodeId) -> Option<i32> {
        self.assignments.get(&node).and_then(|a| a.imm_write_cycle)
    }

    /// Whether `template` can still take effect at `cycle`.
    pub fn is_template_available(&self, cycle: i32, template: TemplateId) -> bool {
        let slot = self.slot(cycle);
        let state = self.cycles.get(&slot);
        let desc = self.machine.template(template);
        if let Some(state) = state {
            if let Some((t, _)) = state.template {
                if t != template {
                    return false;
                }
            }
            // Every bus the template repurposes must be move-free.
            for ts in &desc.slots {
                if state.bus_used.contains_key(&ts.bus) {
                    return false;
                }
            }
        }
        true
    }

    /// First cycle `>= from` where the node fits, scanning a bounded window.
    pub fn earliest_cycle(
        &self,
        from: i32,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        opts: AssignOpts,
    ) -> Option<i32> {
        let window = self.scan_window();
        (from..from + window).find(|c| self.can_assign(*c, ddg, node, opts))
    }

    /// Last cycle `<= from` (not below `floor`) where the node fits.
    pub fn latest_cycle(
        &self,
        from: i32,
        floor: i32,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        opts: AssignOpts,
    ) -> Option<i32> {
        if from < floor {
            return None;
        }
        let lowest = if self.ii > 0 {
            // All modulo slots repeat after one interval.
            floor.max(from - self.ii as i32 + 1)
        } else {
            floor
        };
        (lowest..=from).rev().find(|c| self.can_assign(*c, ddg, node, opts))
    }

    fn scan_window(&self) -> i32 {
        if self.ii > 0 {
            self.ii as i32
        } else {
            // Enough room for any realistic block given bounded resources.
            4 * self.machine.bus_count().max(1) as i32 + 64
        }
    }

    // ------------------------------------------------------------------
    // Mutation

    /// Place `node` at `cycle`. Always succeeds when [Self::can_assign]
    /// returned true for the same arguments and nothing changed in between.
    pub fn assign(
        &mut self,
        cycle: i32,
        ddg: &mut Ddg<'_>,
        node: MoveNodeId,
        opts: AssignOpts,
    ) -> Result<(), ScheduleError> {
        if self.is_assigned(node) {
            return Err(ScheduleError::invariant(
                node.as_u32(),
                "assign of an already assigned node",
            ));
        }
        let mut plan = self.plan(cycle, ddg, node, opts).ok_or_else(|| {
            ScheduleError::SchedulingFailure {
                node: node.as_u32(),
                limit: None,
            }
        })?;

        // Establish FU bindings this assignment implies.
        for po in self.pos_of(ddg, node) {
            let store = ddg.store_mut();
            if store.po(po).fu.is_none() {
                let fu = if store.po(po).inputs.contains(&node) {
                    plan.dst_fu
                } else {
                    plan.src_fu
                };
                if let Some(fu) = fu {
                    store.po_mut(po).fu = Some(fu);
                    plan.bound_pos.push(po);
                }
            }
        }

        self.book(&plan, node);
        ddg.schedule_node(node, cycle);
        log::trace!(
            target: "rm:assign",
            "assigned {node} @{cycle} bus {} (ii {})",
            plan.bus,
            self.ii
        );
        self.assignments.insert(node, plan);
        Ok(())
    }

    /// Take an assignment back, restoring the prior resource tables exactly.
    pub fn unassign(&mut self, ddg: &mut Ddg<'_>, node: MoveNodeId) -> Result<(), ScheduleError> {
        let Some(assignment) = self.assignments.remove(&node) else {
            return Err(ScheduleError::invariant(
                node.as_u32(),
                "unassign of an unassigned node",
            ));
        };
        self.unbook(&assignment, node);
        for po in &assignment.bound_pos {
            ddg.store_mut().po_mut(*po).fu = None;
        }
        ddg.unschedule_node(node);
        log::trace!(target: "rm:assign", "unassigned {node} @{}", assignment.cycle);
        Ok(())
    }

    fn pos_of(&self, ddg: &Ddg<'_>, node: MoveNodeId) -> smallvec::SmallVec<[PoId; 2]> {
        let n = ddg.store().node(node);
        let mut pos: smallvec::SmallVec<[PoId; 2]> = n.dest_ops.iter().copied().collect();
        if let Some(po) = n.source_op {
            pos.push(po);
        }
        pos.sort_unstable();
        pos.dedup();
        pos
    }

    fn book(&mut self, plan: &Assignment, node: MoveNodeId) {
        let slot = self.slot(plan.cycle);
        let state = self.cycles.entry(slot).or_default();
        state.bus_used.insert(plan.bus, node);
        if let (Some(fu), Some(port)) = (plan.dst_fu, plan.dst_port) {
            state.port_writes.insert(port, node);
            if self.machine.port(port).triggering {
                state.fu_trigger.insert(fu, node);
            }
        }
        if let Some(port) = plan.src_port {
            if plan.src_fu.is_some() {
                state.port_reads.insert(port, node);
            }
        }
        if let Some(rf) = plan.rf_read {
            *state.rf_reads.entry(rf).or_insert(0) += 1;
        }
        if let Some(rf) = plan.rf_write {
            *state.rf_writes.entry(rf).or_insert(0) += 1;
        }
        if let (Some(unit), Some(wc), Some(template)) =
            (plan.imm_unit, plan.imm_write_cycle, plan.template)
        {
            let wslot = self.slot(wc);
            let wstate = self.cycles.entry(wslot).or_default();
            match &mut wstate.template {
                Some((t, count)) => {
                    debug_assert_eq!(*t, template);
                    *count += 1;
                }
                None => wstate.template = Some((template, 1)),
            }
            *wstate.imm_writes.entry(unit).or_insert(0) += 1;
        }
    }

    fn unbook(&mut self, assignment: &Assignment, node: MoveNodeId) {
        let slot = self.slot(assignment.cycle);
        let state = self.cycles.get_mut(&slot).expect("assignment without cycle state");
        state.bus_used.remove(&assignment.bus);
        if let (Some(fu), Some(port)) = (assignment.dst_fu, assignment.dst_port) {
            state.port_writes.remove(&port);
            if self.machine.port(port).triggering {
                state.fu_trigger.remove(&fu);
            }
        }
        if let Some(port) = assignment.src_port {
            if assignment.src_fu.is_some() {
                state.port_reads.remove(&port);
            }
        }
        if let Some(rf) = assignment.rf_read {
            let c = state.rf_reads.get_mut(&rf).unwrap();
            *c -= 1;
            if *c == 0 {
                state.rf_reads.remove(&rf);
            }
        }
        if let Some(rf) = assignment.rf_write {
            let c = state.rf_writes.get_mut(&rf).unwrap();
            *c -= 1;
            if *c == 0 {
                state.rf_writes.remove(&rf);
            }
        }
        if state.is_empty() {
            self.cycles.remove(&slot);
        }
        if let (Some(unit), Some(wc)) = (assignment.imm_unit, assignment.imm_write_cycle) {
            let wslot = self.slot(wc);
            if let Some(wstate) = self.cycles.get_mut(&wslot) {
                if let Some((_, count)) = &mut wstate.template {
                    *count -= 1;
                    if *count == 0 {
                        wstate.template = None;
                    }
                }
                if let Some(c) = wstate.imm_writes.get_mut(&unit) {
                    *c -= 1;
                    if *c == 0 {
                        wstate.imm_writes.remove(&unit);
                    }
                }
                if wstate.is_empty() {
                    self.cycles.remove(&wslot);
                }
            }
        }
        let _ = node;
    }

    // ------------------------------------------------------------------
    // The planner

    /// Try to resolve every resource of one move at one cycle.
    fn plan(
        &self,
        cycle: i32,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        opts: AssignOpts,
    ) -> Option<Assignment> {
        if cycle < 0 {
            return None;
        }
        let slot = self.slot(cycle);
        let state = self.cycles.get(&slot);
        let n = ddg.store().node(node);

        // Resolve the destination side.
        let (dst_fu, dst_port, rf_write) = match n.mov.destination {
            Terminal::Register(r) => {
                let pressure = state.map(|s| s.rf_writes.get(&r.rf).copied().unwrap_or(0)).unwrap_or(0);
                let capacity = self.machine.rf_write_ports(r.rf).count() as u32;
                if pressure >= capacity {
                    return None;
                }
                (None, None, Some(r.rf))
            }
            Terminal::FuPort { op, operand, .. } => {
                let (fu, port) = self.resolve_dst_fu(ddg, node, op, operand, opts, state)?;
                (Some(fu), Some(port), None)
            }
            Terminal::ReturnAddress => (None, None, None),
            _ => return None,
        };

        // Resolve the source side. A constant that no bus field carries is
        // staged through an immediate unit, and the transport then reads
        // the unit's port.
        let mut imm_unit = None;
        let mut imm_index = None;
        let mut imm_write_cycle = None;
        let mut template = None;
        let (src_fu, mut src_port, rf_read) = match n.mov.source {
            Terminal::Register(r) => {
                let pressure = state.map(|s| s.rf_reads.get(&r.rf).copied().unwrap_or(0)).unwrap_or(0);
                let capacity = self.machine.rf_read_ports(r.rf).count() as u32;
                if pressure >= capacity {
                    return None;
                }
                let port = self.machine.rf_read_ports(r.rf).next()?;
                (None, Some(port), Some(r.rf))
            }
            Terminal::FuPort { op, operand, .. } => {
                let (fu, port) = self.resolve_src_fu(ddg, node, op, operand, opts, state)?;
                (Some(fu), Some(port), None)
            }
            Terminal::Immediate { .. } => (None, None, None),
            Terminal::ImmRegister { unit, .. } => {
                let port = self.machine.imm_unit(unit).ports.first().copied()?;
                (None, Some(port), None)
            }
            Terminal::ReturnAddress => (None, None, None),
        };

        if let Terminal::Immediate { value, .. } = n.mov.source {
            let fits_short = self
                .machine
                .buses()
                .any(|(_, b)| fits_imm(value, b.imm_width, b.signed_imm));
            if !fits_short {
                let (unit, tmpl, wc) = self.plan_long_immediate(cycle, value, opts)?;
                imm_unit = Some(unit);
                imm_index = Some(opts.imm_index.unwrap_or(0));
                imm_write_cycle = Some(wc);
                template = Some(tmpl);
                src_port = self.machine.imm_unit(unit).ports.first().copied();
            }
        }

        // Pick the bus.
        let short_imm = match n.mov.source {
            Terminal::Immediate { value, .. } if imm_unit.is_none() => Some(value),
            _ => None,
        };
        let bus = self.pick_bus(ddg, node, short_imm, src_port, dst_port, opts, state)?;

        Some(Assignment {
            cycle,
            bus,
            src_fu,
            dst_fu,
            src_port,
            dst_port,
            rf_read,
            rf_write,
            imm_unit,
            imm_index,
            imm_write_cycle,
            template,
            bound_pos: smallvec::SmallVec::new(),
        })
    }

    /// Candidate FU and port for an operand write, honoring an existing
    /// binding of the operation and trigger exclusivity.
    fn resolve_dst_fu(
        &self,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        op: ttac_machine::OpId,
        operand: u8,
        opts: AssignOpts,
        state: Option<&CycleState>,
    ) -> Option<(FuId, PortId)> {
        let bound = ddg
            .store()
            .node(node)
            .dest_ops
            .iter()
            .find_map(|po| ddg.store().po(*po).fu);
        let candidates: Vec<FuId> = match opts.dst_fu.or(bound) {
            Some(fu) => vec![fu],
            None => self.machine.fus_implementing(op).collect(),
        };
        for fu in candidates {
            let Some(hw) = self.machine.fu(fu).hw_operation(op) else {
                continue;
            };
            let Some(port) = hw.port_of(operand) else { continue };
            if let Some(state) = state {
                if state.port_writes.contains_key(&port) {
                    continue;
                }
                if self.machine.port(port).triggering && state.fu_trigger.contains_key(&fu) {
                    continue;
                }
            }
            return Some((fu, port));
        }
        None
    }

    /// Candidate FU and port for a result read.
    fn resolve_src_fu(
        &self,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        op: ttac_machine::OpId,
        operand: u8,
        opts: AssignOpts,
        state: Option<&CycleState>,
    ) -> Option<(FuId, PortId)> {
        let bound = ddg
            .store()
            .node(node)
            .source_op
            .and_then(|po| ddg.store().po(po).fu);
        let candidates: Vec<FuId> = match opts.src_fu.or(bound) {
            Some(fu) => vec![fu],
            None => self.machine.fus_implementing(op).collect(),
        };
        for fu in candidates {
            let Some(hw) = self.machine.fu(fu).hw_operation(op) else {
                continue;
            };
            let Some(port) = hw.port_of(operand) else { continue };
            if let Some(state) = state {
                if state.port_reads.contains_key(&port) {
                    continue;
                }
            }
            return Some((fu, port));
        }
        None
    }

    fn plan_long_immediate(
        &self,
        cycle: i32,
        value: i64,
        opts: AssignOpts,
    ) -> Option<(ImmUnitId, TemplateId, i32)> {
        for (unit_id, unit) in self.machine.imm_units() {
            if let Some(wanted) = opts.imm_unit {
                if wanted != unit_id {
                    continue;
                }
            }
            let wc = opts
                .imm_write_cycle
                .unwrap_or(cycle - unit.latency as i32);
            if wc < 0 || wc >= cycle {
                continue;
            }
            for (tmpl_id, tmpl) in self.machine.templates() {
                let width = tmpl.supported_width(unit_id).min(unit.width);
                if width == 0 || !fits_imm(value, width, unit.signed) {
                    continue;
                }
                if !self.is_template_available(wc, tmpl_id) {
                    continue;
                }
                let wslot = self.slot(wc);
                if let Some(ws) = self.cycles.get(&wslot) {
                    let used = ws.imm_writes.get(&unit_id).copied().unwrap_or(0);
                    if used >= unit.size {
                        continue;
                    }
                }
                return Some((unit_id, tmpl_id, wc));
            }
        }
        None
    }

    fn pick_bus(
        &self,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        short_imm: Option<i64>,
        src_port: Option<PortId>,
        dst_port: Option<PortId>,
        opts: AssignOpts,
        state: Option<&CycleState>,
    ) -> Option<BusId> {
        let n = ddg.store().node(node);
        let candidates: Vec<BusId> = match (src_port, dst_port) {
            (Some(s), Some(d)) => self.machine.buses_connecting(s, d).to_vec(),
            (Some(p), None) | (None, Some(p)) => self.machine.buses_of_port(p).to_vec(),
            (None, None) => self.machine.buses().map(|(id, _)| id).collect(),
        };
        for bus in candidates {
            if let Some(wanted) = opts.bus {
                if bus != wanted {
                    continue;
                }
            }
            if let Some(state) = state {
                if state.bus_used.contains_key(&bus) {
                    continue;
                }
                // A template in effect at this cycle owns its buses.
                if let Some((t, _)) = state.template {
                    if self.machine.template(t).uses_bus(bus) {
                        continue;
                    }
                }
            }
            let bdesc = self.machine.bus(bus);
            // A short immediate rides the bus's own field, which must fit.
            if let Some(v) = short_imm {
                if !fits_imm(v, bdesc.imm_width, bdesc.signed_imm) {
                    continue;
                }
            }
            // The move's guard must exist on this bus.
            if let Some(g) = n.mov.guard {
                let source = match g.source {
                    GuardSrc::Register(r) => GuardSource::Register {
                        rf: r.rf,
                        index: r.index,
                    },
                    GuardSrc::FuPort { fu, op, operand } => {
                        let port = self
                            .machine
                            .fu(fu)
                            .hw_operation(op)
                            .and_then(|hw| hw.port_of(operand))?;
                        GuardSource::FuPort { fu, port }
                    }
                };
                let Some(guard) = self.machine.find_guard(source, g.inverted) else {
                    continue;
                };
                if !bdesc.guards.contains(&guard) {
                    continue;
                }
            }
            return Some(bus);
        }
        None
    }

    // ------------------------------------------------------------------
    // Emission

    /// The scheduled program as a cycle-indexed instruction stream.
    ///
    /// Assignments at or above [PROLOG_CYCLE_BIAS] are emitted into the
    /// prolog stream, renumbered from zero.
    pub fn instructions(&self, ddg: &Ddg<'_>) -> InstructionStream {
        let mut body: BTreeMap<i32, Instruction> = BTreeMap::new();
        let mut prolog: BTreeMap<i32, Instruction> = BTreeMap::new();
        for (node, a) in &self.assignments {
            let (map, cycle) = if a.cycle >= PROLOG_CYCLE_BIAS {
                (&mut prolog, a.cycle - PROLOG_CYCLE_BIAS)
            } else {
                (&mut body, a.cycle)
            };
            let n = ddg.store().node(*node);
            let instr = map.entry(cycle).or_insert_with(|| Instruction {
                cycle,
                ..Instruction::default()
            });
            instr.moves.push(ScheduledMove {
                node: *node,
                mov: n.mov.clone(),
                bus: a.bus,
                guard: n.mov.guard,
            });
            // The template takes effect in the staging cycle, which may not
            // carry any move of its own.
            if let (Some(unit), Some(index), Some(value), Some(wc)) = (
                a.imm_unit,
                a.imm_index,
                n.mov.source.immediate_value(),
                a.imm_write_cycle,
            ) {
                let biased = wc >= PROLOG_CYCLE_BIAS;
                let (wmap, wcycle) = if biased {
                    (&mut prolog, wc - PROLOG_CYCLE_BIAS)
                } else {
                    (&mut body, wc)
                };
                let wi = wmap.entry(wcycle).or_insert_with(|| Instruction {
                    cycle: wcycle,
                    ..Instruction::default()
                });
                wi.template = a.template;
                wi.immediates.push((unit, index, value));
            }
        }
        // Moves within an instruction ordered by bus for a stable dump.
        let finish = |map: BTreeMap<i32, Instruction>| {
            map.into_values()
                .map(|mut i| {
                    i.moves.sort_by_key(|m| m.bus);
                    i
                })
                .collect::<Vec<_>>()
        };
        InstructionStream {
            instructions: finish(body),
            prolog: finish(prolog),
            epilog: Vec::new(),
        }
    }
}

impl CycleState {
    fn is_empty(&self) -> bool {
        self.bus_used.is_empty()
            && self.fu_trigger.is_empty()
            && self.port_writes.is_empty()
            && self.port_reads.is_empty()
            && self.rf_reads.is_empty()
            && self.rf_writes.is_empty()
            && self.template.is_none()
            && self.imm_writes.is_empty()
    }
}

fn fits_imm(value: i64, width: u32, signed: bool) -> bool {
    if width == 0 {
        return false;
    }
    if signed {
        MachineInfo::required_signed_bits(value) <= width
    } else {
        MachineInfo::required_unsigned_bits(value) <= width
    }
}

//! Post-failure diagnosis of what resource actually limited a schedule.
//!
//! Runs after the scheduler gives up on a move; inspects the manager state
//! over the cycle window the move was tried in and names the busiest
//! resource class. Purely diagnostic, never schedules anything.

use ttac_ddg::Ddg;
use ttac_program::{MoveNodeId, Terminal};
use ttac_session::LimitingResource;

use crate::{AssignOpts, ResourceManager};

/// Names the resource class that most plausibly blocked `node` in
/// `[from, to]`.
pub struct ResourceConstraintAnalyzer;

impl ResourceConstraintAnalyzer {
    pub fn analyze(
        rm: &ResourceManager<'_>,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        from: i32,
        to: i32,
    ) -> LimitingResource {
        let machine = rm.machine();
        let n = ddg.store().node(node);

        // No bus at all between the endpoints is a machine problem, not a
        // congestion problem.
        if let (Terminal::Register(_), Terminal::FuPort { op, .. }) =
            (&n.mov.source, &n.mov.destination)
        {
            if machine.fus_implementing(*op).next().is_none() {
                return LimitingResource::Connectivity;
            }
        }

        let mut bus_full = 0u32;
        let mut cycles = 0u32;
        for cycle in from..=to.max(from) {
            cycles += 1;
            let free_bus = machine
                .buses()
                .any(|(bus, _)| rm.can_assign_on_bus(cycle, ddg, node, bus));
            if !free_bus {
                bus_full += 1;
            }
        }
        if cycles > 0 && bus_full == cycles {
            return LimitingResource::Buses;
        }
        if n.mov.destination.is_fu_port() {
            return LimitingResource::FuPipeline;
        }
        if matches!(n.mov.source, Terminal::Immediate { .. }) {
            return LimitingResource::ImmediateTemplates;
        }
        if n.mov.destination.is_register() || n.mov.source.is_register() {
            return LimitingResource::RegisterFilePorts;
        }
        LimitingResource::Dependences
    }
}

impl ResourceManager<'_> {
    fn can_assign_on_bus(
        &self,
        cycle: i32,
        ddg: &Ddg<'_>,
        node: MoveNodeId,
        bus: ttac_machine::BusId,
    ) -> bool {
        self.can_assign(
            cycle,
            ddg,
            node,
            AssignOpts {
                bus: Some(bus),
                ..AssignOpts::default()
            },
        )
    }
}

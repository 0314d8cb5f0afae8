use std::collections::BTreeMap;

use ttac_machine::{Machine, OpId, OperationDag, OperationDagSelector, OperationRegistry};
use ttac_session::ScheduleError;

use crate::footprint::Footprint;

/// A call into the emulation library replacing one unsupported operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulationCall {
    pub footprint: Footprint,
    /// Library function symbol, e.g. `__emul_i32_mul`.
    pub function: String,
}

/// How one missing operation gets realized.
#[derive(Debug, Clone)]
pub enum Lowering<'a> {
    /// The machine executes it directly; nothing to do.
    Native,
    /// Expand into simpler operations the machine has.
    Decompose(&'a OperationDag),
    /// Call the emulation library.
    Call(&'a EmulationCall),
}

/// Plans replacements for operations the target machine lacks.
///
/// For every required operation not in the machine's opset, the planner
/// first tries a DAG decomposition into supported operations; failing
/// that, it looks up an emulation call keyed by the operation's footprint.
/// A footprint with no registered emulation is a fatal
/// [ScheduleError::MissingEmulation].
pub struct MissingOpLowering<'a> {
    machine: &'a Machine,
    registry: &'a OperationRegistry,
    emulations: BTreeMap<Footprint, EmulationCall>,
}

impl<'a> MissingOpLowering<'a> {
    pub fn new(machine: &'a Machine, registry: &'a OperationRegistry) -> Self {
        Self {
            machine,
            registry,
            emulations: BTreeMap::new(),
        }
    }

    /// Register one emulation-library function under its footprint.
    pub fn register_emulation(&mut self, footprint: Footprint, function: impl Into<String>) {
        let call = EmulationCall {
            footprint: footprint.clone(),
            function: function.into(),
        };
        self.emulations.insert(footprint, call);
    }

    pub fn footprint(&self, op: OpId) -> Footprint {
        Footprint::of(self.registry, op)
    }

    /// The required operations the machine does not implement, id order.
    pub fn missing_operations(&self, required: &[OpId]) -> Vec<OpId> {
        let mut missing: Vec<OpId> = required
            .iter()
            .copied()
            .filter(|op| !self.machine.supports(*op))
            .collect();
        missing.sort_unstable();
        missing.dedup();
        missing
    }

    /// The emulation call registered for a footprint.
    pub fn lowering_for(&self, footprint: &Footprint) -> Result<&EmulationCall, ScheduleError> {
        self.emulations
            .get(footprint)
            .ok_or_else(|| ScheduleError::MissingEmulation {
                footprint: footprint.as_str().to_owned(),
            })
    }

    /// One lowering decision per required operation.
    pub fn plan(&self, required: &[OpId]) -> Result<Vec<(OpId, Lowering<'_>)>, ScheduleError> {
        let opset = self.machine.opset();
        let mut plan = Vec::with_capacity(required.len());
        for &op in required {
            if self.machine.supports(op) {
                plan.push((op, Lowering::Native));
                continue;
            }
            let desc = self.registry.get(op);
            if let Some(dag) = OperationDagSelector::cheapest_dag(&desc.dags, &opset) {
                log::debug!(
                    target: "lower:missing",
                    "decomposing '{}' as {}",
                    desc.name,
                    dag.expansion
                );
                plan.push((op, Lowering::Decompose(dag)));
                continue;
            }
            let footprint = self.footprint(op);
            let call = self.lowering_for(&footprint)?;
            plan.push((op, Lowering::Call(call)));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ttac_machine::testing;

    use super::*;

    #[test]
    fn unregistered_footprint_is_fatal() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::single_alu_machine(&registry, &["add"]);
        let lowering = MissingOpLowering::new(&m.machine, &registry);
        let mul = registry.expect("mul");

        assert_eq!(lowering.missing_operations(&[mul]), vec![mul]);
        let err = lowering.plan(&[mul]).unwrap_err();
        assert!(matches!(err, ScheduleError::MissingEmulation { footprint }
            if footprint == "i32.mul.i32.i32"));
    }

    #[test]
    fn registered_emulation_resolves() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::single_alu_machine(&registry, &["add"]);
        let mut lowering = MissingOpLowering::new(&m.machine, &registry);
        let mul = registry.expect("mul");
        lowering.register_emulation(Footprint::parse("i32.mul.i32.i32"), "__emul_i32_mul");

        let plan = lowering.plan(&[mul]).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(&plan[0].1, Lowering::Call(c) if c.function == "__emul_i32_mul"));
    }

    #[test]
    fn decomposition_beats_emulation() {
        let mut registry = OperationRegistry::with_base_operations();
        let sub = registry.expect("sub");
        // A negation operation decomposable as sub(0, x).
        let neg = registry.add(ttac_machine::OperationDesc {
            name: "neg".into(),
            inputs: 1,
            outputs: 1,
            operand_widths: [32u32, 32].into_iter().collect(),
            commutative_pairs: Default::default(),
            latencies: [1u32].into_iter().collect(),
            address_operand: None,
            reads_memory: false,
            writes_memory: false,
            side_effects: false,
            control_flow: false,
            is_call: false,
            dags: vec![OperationDag {
                expansion: "sub(0, x)".into(),
                operations: vec![sub],
            }],
        });
        let m = testing::single_alu_machine(&registry, &["add", "sub"]);
        let lowering = MissingOpLowering::new(&m.machine, &registry);
        let plan = lowering.plan(&[neg]).unwrap();
        assert!(matches!(&plan[0].1, Lowering::Decompose(d) if d.expansion == "sub(0, x)"));
    }
}

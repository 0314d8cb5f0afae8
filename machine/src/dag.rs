//! Decomposition of operations into simpler ones.
//!
//! An operation the target machine lacks can sometimes be expanded into a
//! DAG of operations it has: `neg` as `sub(0, x)`, `ge` as `not(lt(x, y))`,
//! and so on. The registry stores the alternatives; the selector picks the
//! cheapest one whose leaves the machine all implements.

use rustc_hash::FxHashSet;

use crate::OpId;

/// One decomposition alternative for an operation.
#[derive(Debug, Clone)]
pub struct OperationDag {
    /// Human-readable description, e.g. `"sub(0, x)"`.
    pub expansion: String,
    /// The operations the expansion consists of, in dependence order.
    pub operations: Vec<OpId>,
}

impl OperationDag {
    /// Cost estimate used to rank alternatives. Fewer operations win;
    /// real latencies are not consulted here since the FU binding is not
    /// known yet.
    pub fn cost(&self) -> usize {
        self.operations.len()
    }

    pub fn is_executable_with(&self, opset: &FxHashSet<OpId>) -> bool {
        self.operations.iter().all(|op| opset.contains(op))
    }
}

/// Picks decomposition DAGs executable on a given opset.
pub struct OperationDagSelector;

impl OperationDagSelector {
    /// All alternatives of `dags` whose operations are in `opset`, cheapest
    /// first.
    pub fn executable_dags<'a>(
        dags: &'a [OperationDag],
        opset: &FxHashSet<OpId>,
    ) -> Vec<&'a OperationDag> {
        let mut found: Vec<&OperationDag> =
            dags.iter().filter(|d| d.is_executable_with(opset)).collect();
        found.sort_by_key(|d| d.cost());
        found
    }

    /// The cheapest executable alternative, if any.
    pub fn cheapest_dag<'a>(
        dags: &'a [OperationDag],
        opset: &FxHashSet<OpId>,
    ) -> Option<&'a OperationDag> {
        Self::executable_dags(dags, opset).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperationRegistry;

    #[test]
    fn cheapest_executable_dag_wins() {
        let registry = OperationRegistry::with_base_operations();
        let add = registry.expect("add");
        let sub = registry.expect("sub");
        let xor = registry.expect("xor");

        let dags = vec![
            OperationDag {
                expansion: "three-op variant".into(),
                operations: vec![add, sub, xor],
            },
            OperationDag {
                expansion: "sub(0, x)".into(),
                operations: vec![sub],
            },
        ];

        let mut opset = FxHashSet::default();
        opset.insert(add);
        opset.insert(sub);
        opset.insert(xor);
        let best = OperationDagSelector::cheapest_dag(&dags, &opset).unwrap();
        assert_eq!(best.expansion, "sub(0, x)");

        // Remove sub; only the three-op variant remains and it is no longer
        // executable either.
        opset.remove(&sub);
        assert!(OperationDagSelector::cheapest_dag(&dags, &opset).is_none());
    }
}

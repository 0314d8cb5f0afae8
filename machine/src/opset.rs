use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use crate::dag::OperationDag;

/// An operation in the registry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);
entity_impl!(OpId, "op");

/// Static description of one operation: operand shape, semantics flags and
/// per-output latency defaults.
///
/// Operand indices are 1-based for inputs and continue past the inputs for
/// outputs, so a 2-input 1-output operation has operands 1, 2 and 3.
#[derive(Debug, Clone)]
pub struct OperationDesc {
    pub name: String,
    pub inputs: u8,
    pub outputs: u8,
    /// Bit width per operand, inputs first, outputs after.
    pub operand_widths: SmallVec<[u32; 4]>,
    /// Input operand pairs whose values may be exchanged.
    pub commutative_pairs: SmallVec<[(u8, u8); 1]>,
    /// Default latency per output, overridable per FU binding.
    pub latencies: SmallVec<[u32; 2]>,
    /// Which input operand carries the memory address, for the alias
    /// analyzers. `None` for non-memory operations.
    pub address_operand: Option<u8>,
    pub reads_memory: bool,
    pub writes_memory: bool,
    /// Has effects beyond its outputs (I/O, internal FU state).
    pub side_effects: bool,
    pub control_flow: bool,
    pub is_call: bool,
    /// Alternative decompositions into simpler operations.
    pub dags: Vec<OperationDag>,
}

impl OperationDesc {
    pub fn operand_count(&self) -> u8 {
        self.inputs + self.outputs
    }

    pub fn is_output(&self, operand: u8) -> bool {
        operand > self.inputs && operand <= self.operand_count()
    }

    pub fn operand_width(&self, operand: u8) -> u32 {
        self.operand_widths
            .get(operand as usize - 1)
            .copied()
            .unwrap_or(32)
    }

    /// Latency of the given output, by absolute operand index.
    pub fn latency(&self, output_operand: u8) -> u32 {
        debug_assert!(self.is_output(output_operand));
        self.latencies
            .get((output_operand - self.inputs) as usize - 1)
            .copied()
            .unwrap_or(1)
    }

    pub fn max_latency(&self) -> u32 {
        self.latencies.iter().copied().max().unwrap_or(1)
    }

    pub fn is_commutative_pair(&self, a: u8, b: u8) -> bool {
        self.commutative_pairs
            .iter()
            .any(|&(x, y)| (x, y) == (a, b) || (x, y) == (b, a))
    }

    /// Whether the values of input operands `a` and `b` may be exchanged.
    ///
    /// Only the registered pairs are consulted; swaps are not considered
    /// transitive across more than one pair at a time.
    pub fn can_swap(&self, a: u8, b: u8) -> bool {
        a != b
            && a <= self.inputs
            && b <= self.inputs
            && self.is_commutative_pair(a, b)
    }

    pub fn accesses_memory(&self) -> bool {
        self.reads_memory || self.writes_memory
    }
}

/// Immutable per-compilation operation table.
///
/// Built once up front and passed by reference everywhere; nothing consults
/// process-global state.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    ops: PrimaryMap<OpId, OperationDesc>,
    by_name: FxHashMap<String, OpId>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the base integer/memory/control operations
    /// every target is expected to name consistently.
    pub fn with_base_operations() -> Self {
        let mut r = Self::new();
        let bin = |r: &mut Self, name: &str, commutative: bool, latency: u32| {
            r.add(OperationDesc {
                name: name.into(),
                inputs: 2,
                outputs: 1,
                operand_widths: smallvec![32, 32, 32],
                commutative_pairs: if commutative { smallvec![(1, 2)] } else { smallvec![] },
                latencies: smallvec![latency],
                address_operand: None,
                reads_memory: false,
                writes_memory: false,
                side_effects: false,
                control_flow: false,
                is_call: false,
                dags: Vec::new(),
            });
        };
        bin(&mut r, "add", true, 1);
        bin(&mut r, "sub", false, 1);
        bin(&mut r, "mul", true, 2);
        bin(&mut r, "and", true, 1);
        bin(&mut r, "ior", true, 1);
        bin(&mut r, "xor", true, 1);
        bin(&mut r, "eq", true, 1);
        bin(&mut r, "ne", true, 1);
        bin(&mut r, "gt", false, 1);
        bin(&mut r, "gtu", false, 1);
        bin(&mut r, "shl", false, 1);
        bin(&mut r, "shr", false, 1);
        r.add(OperationDesc {
            name: "ldw".into(),
            inputs: 1,
            outputs: 1,
            operand_widths: smallvec![32, 32],
            commutative_pairs: smallvec![],
            latencies: smallvec![2],
            address_operand: Some(1),
            reads_memory: true,
            writes_memory: false,
            side_effects: false,
            control_flow: false,
            is_call: false,
            dags: Vec::new(),
        });
        r.add(OperationDesc {
            name: "stw".into(),
            inputs: 2,
            outputs: 0,
            operand_widths: smallvec![32, 32],
            commutative_pairs: smallvec![],
            latencies: smallvec![],
            address_operand: Some(1),
            reads_memory: false,
            writes_memory: true,
            side_effects: false,
            control_flow: false,
            is_call: false,
            dags: Vec::new(),
        });
        r.add(OperationDesc {
            name: "jump".into(),
            inputs: 1,
            outputs: 0,
            operand_widths: smallvec![32],
            commutative_pairs: smallvec![],
            latencies: smallvec![],
            address_operand: None,
            reads_memory: false,
            writes_memory: false,
            side_effects: false,
            control_flow: true,
            is_call: false,
            dags: Vec::new(),
        });
        r.add(OperationDesc {
            name: "call".into(),
            inputs: 1,
            outputs: 0,
            operand_widths: smallvec![32],
            commutative_pairs: smallvec![],
            latencies: smallvec![],
            address_operand: None,
            reads_memory: false,
            writes_memory: false,
            side_effects: true,
            control_flow: true,
            is_call: true,
            dags: Vec::new(),
        });
        r
    }

    pub fn add(&mut self, desc: OperationDesc) -> OpId {
        debug_assert!(
            !self.by_name.contains_key(&desc.name),
            "duplicate operation '{}'",
            desc.name
        );
        let name = desc.name.clone();
        let id = self.ops.push(desc);
        self.by_name.insert(name, id);
        id
    }

    pub fn get(&self, id: OpId) -> &OperationDesc {
        &self.ops[id]
    }

    pub fn lookup(&self, name: &str) -> Option<OpId> {
        self.by_name.get(name).copied()
    }

    /// Lookup that must succeed; for operations the caller just registered.
    pub fn expect(&self, name: &str) -> OpId {
        self.lookup(name)
            .unwrap_or_else(|| panic!("operation '{name}' not registered"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (OpId, &OperationDesc)> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

use ttac_machine::{Machine, MachineInfo, OperationRegistry, RfKind};
use ttac_program::{BasicBlock, RegRef, Terminal};
use ttac_session::ScheduleError;

/// Legalizes immediates the machine cannot encode.
///
/// Every immediate operand of every move is checked against the machine's
/// bus fields and long-immediate templates. A value that fits nowhere is
/// rewritten as `t = sub(0, -value); use(t)` when the negated value is
/// encodable and the machine subtracts; otherwise the original literal is
/// reported as fatal.
pub struct ConstantTransformer<'a> {
    machine: &'a Machine,
    registry: &'a OperationRegistry,
    /// Scratch register receiving rewritten constants.
    scratch: RegRef,
}

impl<'a> ConstantTransformer<'a> {
    pub fn new(machine: &'a Machine, registry: &'a OperationRegistry) -> Self {
        // The top register of the first general-purpose file serves as the
        // materialization target.
        let scratch = machine
            .rfs()
            .find(|(_, rf)| rf.kind == RfKind::Normal && rf.width >= 32 && rf.size > 0)
            .map(|(rf, desc)| RegRef {
                rf,
                index: (desc.size - 1) as u16,
            })
            .unwrap_or(RegRef {
                rf: ttac_machine::RfId::from_u32(0),
                index: 0,
            });
        Self {
            machine,
            registry,
            scratch,
        }
    }

    pub fn with_scratch(mut self, scratch: RegRef) -> Self {
        self.scratch = scratch;
        self
    }

    fn encodable(&self, value: i64, width: u32) -> bool {
        MachineInfo::can_encode_immediate_integer(self.machine, value, width)
    }

    /// Rewrite `block` so every remaining immediate is encodable.
    ///
    /// Returns the rewritten block and whether anything changed.
    pub fn transform(&self, block: &BasicBlock) -> Result<(BasicBlock, bool), ScheduleError> {
        let mut out = BasicBlock::new();
        let mut changed = false;
        let sub = self.registry.lookup("sub");
        for bm in block.moves() {
            let Terminal::Immediate { value, width } = bm.mov.source else {
                out.push_move(bm.mov.clone(), bm.group);
                continue;
            };
            if self.encodable(value, width) {
                out.push_move(bm.mov.clone(), bm.group);
                continue;
            }
            // Negate-and-subtract: usable when the negation fits and the
            // machine can subtract.
            let negated = value.checked_neg();
            let rewrite = match (negated, sub) {
                (Some(neg), Some(sub_op))
                    if self.encodable(neg, width) && self.machine.supports(sub_op) =>
                {
                    Some((neg, sub_op))
                }
                _ => None,
            };
            let Some((neg, sub_op)) = rewrite else {
                return Err(ScheduleError::UnencodableImmediate {
                    literal: format!("{value:#x}"),
                });
            };
            log::debug!(
                target: "lower:constants",
                "rewriting immediate {value:#x} as sub(0, {neg:#x})"
            );
            out.operation(
                self.registry,
                sub_op,
                &[
                    Terminal::Immediate { value: 0, width },
                    Terminal::Immediate { value: neg, width },
                ],
                &[Terminal::Register(self.scratch)],
            );
            let mut mov = bm.mov.clone();
            mov.source = Terminal::Register(self.scratch);
            out.push_move(mov, bm.group);
            changed = true;
        }
        Ok((out, changed))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ttac_machine::testing;

    use super::*;

    #[test]
    fn encodable_immediates_pass_through() {
        let registry = OperationRegistry::with_base_operations();
        let m = testing::minimal_machine(&registry);
        let xform = ConstantTransformer::new(&m.machine, &registry);
        let add = registry.expect("add");
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::imm(7), Terminal::reg(m.rf, 1)],
            &[Terminal::reg(m.rf, 2)],
        );
        let (out, changed) = xform.transform(&bb).unwrap();
        assert!(!changed);
        assert_eq!(out.len(), bb.len());
    }

    #[test]
    fn unencodable_immediate_pins_the_original_literal() {
        let registry = OperationRegistry::with_base_operations();
        // 12-bit buses, no long-immediate templates: 0x12345678 fits
        // nothing, and so does its negation.
        let mut b = ttac_machine::MachineBuilder::new("narrow");
        b.bus("b0", 32, 12);
        let rf = b.register_file("RF", 32, 16, 2, 2, 1);
        let alu = b.function_unit("ALU");
        let in1 = b.input_port(alu, "in1", 32, false);
        let in1t = b.input_port(alu, "in1t", 32, true);
        let out1 = b.output_port(alu, "out1", 32);
        for name in ["add", "sub"] {
            let op = registry.expect(name);
            b.bind(alu, op, &[(1, in1), (2, in1t), (3, out1)], &[(3, 1)]);
        }
        b.fully_connect();
        let machine = b.finish();

        let xform = ConstantTransformer::new(&machine, &registry);
        let add = registry.expect("add");
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::imm(0x12345678), Terminal::reg(rf, 1)],
            &[Terminal::reg(rf, 2)],
        );
        let err = xform.transform(&bb).unwrap_err();
        assert!(
            matches!(err, ScheduleError::UnencodableImmediate { ref literal }
                if literal == "0x12345678"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn negatable_immediate_becomes_sub() {
        let registry = OperationRegistry::with_base_operations();
        // A 12-bit sign-extending field: 2048 is one past the positive
        // edge, while -2048 still fits.
        let mut b = ttac_machine::MachineBuilder::new("narrow-imm");
        b.bus("b0", 32, 12);
        let rf = b.register_file("RF", 32, 16, 2, 2, 1);
        let alu = b.function_unit("ALU");
        let in1 = b.input_port(alu, "in1", 32, false);
        let in1t = b.input_port(alu, "in1t", 32, true);
        let out1 = b.output_port(alu, "out1", 32);
        for name in ["add", "sub"] {
            let op = registry.expect(name);
            b.bind(alu, op, &[(1, in1), (2, in1t), (3, out1)], &[(3, 1)]);
        }
        b.fully_connect();
        let machine = b.finish();

        let xform = ConstantTransformer::new(&machine, &registry);
        let add = registry.expect("add");
        let mut bb = BasicBlock::new();
        bb.operation(
            &registry,
            add,
            &[Terminal::imm(2048), Terminal::reg(rf, 1)],
            &[Terminal::reg(rf, 2)],
        );
        let (out, changed) = xform.transform(&bb).unwrap();
        assert!(changed);
        // The sub instance (3 moves) precedes the rewritten operand write.
        assert_eq!(out.len(), bb.len() + 3);
        assert!(out.moves()[3].mov.source.is_register());
    }
}

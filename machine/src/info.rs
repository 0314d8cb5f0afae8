//! Encodability and capability queries over a [Machine].

use crate::{Machine, OpId};

/// Stateless query helpers over the machine model.
pub struct MachineInfo;

impl MachineInfo {
    /// Bits needed to represent `value` in a sign-extending field.
    pub fn required_signed_bits(value: i64) -> u32 {
        if value >= 0 {
            64 - value.leading_zeros() + 1
        } else {
            64 - value.leading_ones() + 1
        }
    }

    /// Bits needed to represent `value` in a zero-extending field.
    pub fn required_unsigned_bits(value: i64) -> u32 {
        if value < 0 {
            // Negative values never fit a zero-extending field narrower than
            // the full operand width.
            64
        } else {
            (64 - value.leading_zeros()).max(1)
        }
    }

    fn fits(value: i64, width: u32, signed: bool) -> bool {
        if width == 0 {
            return false;
        }
        if signed {
            Self::required_signed_bits(value) <= width
        } else {
            Self::required_unsigned_bits(value) <= width
        }
    }

    /// Whether some bus short-immediate field can carry `value`.
    pub fn can_encode_as_short_immediate(machine: &Machine, value: i64) -> bool {
        machine
            .buses()
            .any(|(_, bus)| Self::fits(value, bus.imm_width, bus.signed_imm))
    }

    /// Whether any immediate encoding of the machine, short or template
    /// based, can carry `value` destined for an operand of `width` bits.
    pub fn can_encode_immediate_integer(machine: &Machine, value: i64, width: u32) -> bool {
        if Self::can_encode_as_short_immediate(machine, value) {
            return true;
        }
        for (_, template) in machine.templates() {
            for (iu, unit) in machine.imm_units() {
                let supported = template.supported_width(iu).min(unit.width).min(width.max(1));
                if supported > 0 && Self::fits(value, supported, unit.signed) {
                    return true;
                }
            }
        }
        false
    }

    /// Name of an operation for diagnostics, going through the registry.
    pub fn operation_name(registry: &crate::OperationRegistry, op: OpId) -> String {
        registry.get(op).name.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MachineBuilder, OperationRegistry};

    #[test]
    fn signed_bit_widths() {
        assert_eq!(MachineInfo::required_signed_bits(0), 1);
        assert_eq!(MachineInfo::required_signed_bits(1), 2);
        assert_eq!(MachineInfo::required_signed_bits(-1), 1);
        assert_eq!(MachineInfo::required_signed_bits(127), 8);
        assert_eq!(MachineInfo::required_signed_bits(-128), 8);
        assert_eq!(MachineInfo::required_signed_bits(128), 9);
    }

    #[test]
    fn short_immediate_encodability_follows_bus_width() {
        let registry = OperationRegistry::with_base_operations();
        let mut b = MachineBuilder::new("imm-test");
        b.bus("b0", 32, 12);
        b.fully_connect();
        let machine = b.finish();
        let _ = registry;

        assert!(MachineInfo::can_encode_immediate_integer(&machine, 2047, 32));
        assert!(MachineInfo::can_encode_immediate_integer(&machine, -2048, 32));
        assert!(!MachineInfo::can_encode_immediate_integer(&machine, 2048, 32));
        assert!(!MachineInfo::can_encode_immediate_integer(
            &machine, 0x12345678, 32
        ));
    }

    #[test]
    fn template_encodes_what_buses_cannot() {
        let mut b = MachineBuilder::new("limm-test");
        let b0 = b.bus("b0", 32, 8);
        let b1 = b.bus("b1", 32, 8);
        let iu = b.immediate_unit("IU", 32, 2);
        b.instruction_template("limm", &[(b0, 16, iu), (b1, 16, iu)]);
        b.fully_connect();
        let machine = b.finish();

        assert!(MachineInfo::can_encode_immediate_integer(
            &machine, 0x12345678, 32
        ));
        assert!(!MachineInfo::can_encode_as_short_immediate(
            &machine, 0x12345678
        ));
    }
}

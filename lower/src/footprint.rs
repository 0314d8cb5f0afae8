use ttac_machine::{OpId, OperationRegistry};

/// How a sub-word operand widens to the machine word.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperandExtension {
    Signed,
    Unsigned,
    /// Full-width operands need no extension.
    None,
}

/// A type-decorated operation identifier, e.g. `i32.add.i32.i32`: result
/// types first, then the operation name, then operand types.
///
/// Footprints key the emulation-function registry: an operation the machine
/// cannot execute is replaced by a call to the library function registered
/// under its footprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Footprint(String);

impl Footprint {
    /// The footprint of one operation with its registered operand widths.
    pub fn of(registry: &OperationRegistry, op: OpId) -> Self {
        let desc = registry.get(op);
        let mut parts: Vec<String> = Vec::new();
        for k in 1..=desc.outputs {
            parts.push(type_name(desc.operand_width(desc.inputs + k)));
        }
        parts.push(desc.name.clone());
        for i in 1..=desc.inputs {
            parts.push(type_name(desc.operand_width(i)));
        }
        Self(parts.join("."))
    }

    /// A footprint from its textual form, for registering emulations.
    pub fn parse(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extension behavior of sub-word operands, read off the decorated
    /// name: int-to-float conversions spell their signedness.
    pub fn operand_extension(&self) -> OperandExtension {
        if self.0.contains(".sitofp.") {
            OperandExtension::Signed
        } else if self.0.contains(".uitofp.") {
            OperandExtension::Unsigned
        } else {
            OperandExtension::None
        }
    }
}

impl core::fmt::Display for Footprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn type_name(width: u32) -> String {
    format!("i{width}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footprint_decorates_outputs_name_inputs() {
        let registry = OperationRegistry::with_base_operations();
        let add = registry.expect("add");
        assert_eq!(Footprint::of(&registry, add).as_str(), "i32.add.i32.i32");
        let stw = registry.expect("stw");
        assert_eq!(Footprint::of(&registry, stw).as_str(), "stw.i32.i32");
    }

    #[test]
    fn extension_comes_from_the_name() {
        assert_eq!(
            Footprint::parse("f32.sitofp.i16").operand_extension(),
            OperandExtension::Signed
        );
        assert_eq!(
            Footprint::parse("f32.uitofp.i16").operand_extension(),
            OperandExtension::Unsigned
        );
        assert_eq!(
            Footprint::parse("i32.add.i32.i32").operand_extension(),
            OperandExtension::None
        );
    }
}

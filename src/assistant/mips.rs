use std::collections::HashMap;

use super::{generic_register_destination, load_annotation, read_register_name, Assistant, Context};
use crate::bits::to_signed;
use crate::instruction::{Condition, Instruction, Operand};

type Handler = fn(&MipsAssistant, &Context, &Instruction) -> Option<String>;

const LOADS: &[(&str, usize)] = &[
    ("lb", 1),
    ("lbu", 1),
    ("lh", 2),
    ("lhu", 2),
    ("lw", 4),
    ("lwu", 4),
    ("ld", 8),
];

pub struct MipsAssistant {
    handlers: HashMap<&'static str, Handler>,
    loads: HashMap<&'static str, usize>,
}

impl Default for MipsAssistant {
    fn default() -> Self {
        Self::new()
    }
}

impl MipsAssistant {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        for mnemonic in ["move", "li", "lui", "addiu", "addu", "daddiu", "daddu", "subu"] {
            handlers.insert(mnemonic, |a, ctx, insn| generic_register_destination(a, ctx, insn));
        }
        Self {
            handlers,
            loads: LOADS.iter().copied().collect(),
        }
    }
}

impl Assistant for MipsAssistant {
    fn read_register(&self, ctx: &Context, insn: &Instruction, name: &str) -> Option<u64> {
        match name.trim_start_matches('$') {
            "zero" => Some(0),
            _ => read_register_name(self, ctx, insn, name),
        }
    }

    fn parse_memory(&self, ctx: &Context, insn: &Instruction, op: &Operand) -> Option<u64> {
        let mem = op.memory()?;
        let base = self.read_register(ctx, insn, mem.base.as_deref()?)?;
        Some(base.wrapping_add(mem.disp as u64))
    }

    /// Branch conditions compare register values, so they resolve whenever
    /// the operands did.
    fn condition(&self, ctx: &Context, insn: &Instruction) -> Condition {
        let bits = ctx.arch.ptrbits();
        let value = |i: usize| insn.operands.get(i).and_then(|op| op.before_value);
        let signed = |i: usize| value(i).map(|v| to_signed(v, bits));

        let taken = match insn.mnemonic.as_str() {
            "beq" => value(0).zip(value(1)).map(|(a, b)| a == b),
            "bne" => value(0).zip(value(1)).map(|(a, b)| a != b),
            "beqz" => value(0).map(|a| a == 0),
            "bnez" => value(0).map(|a| a != 0),
            "bgez" => signed(0).map(|a| a >= 0),
            "bgtz" => signed(0).map(|a| a > 0),
            "blez" => signed(0).map(|a| a <= 0),
            "bltz" => signed(0).map(|a| a < 0),
            _ => None,
        };
        taken.map(Condition::from).unwrap_or(Condition::Undetermined)
    }

    fn annotate(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let mnemonic = insn.mnemonic.as_str();
        if let Some(size) = self.loads.get(mnemonic) {
            let [dest, source] = insn.operands.as_slice() else {
                return None;
            };
            return load_annotation(self, ctx, insn, dest, source, *size);
        }
        let handler = self.handlers.get(mnemonic)?;
        handler(self, ctx, insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{ArchInfo, Architecture};
    use crate::config::Config;
    use crate::instruction::OperandKind;
    use crate::snapshot::Snapshot;

    fn branch(mnemonic: &str, values: &[Option<u64>]) -> Instruction {
        let mut insn = Instruction::new(Architecture::Mips, 0x1000, 4, mnemonic, "");
        insn.operands = values
            .iter()
            .map(|value| {
                let mut op = Operand::new(OperandKind::Register("t0".into()));
                op.before_value = *value;
                op
            })
            .collect();
        insn
    }

    #[test]
    fn branch_conditions_from_operands() {
        let snapshot = Snapshot::new(ArchInfo::new(Architecture::Mips));
        let config = Config::default();
        let ctx = Context {
            process: &snapshot,
            config: &config,
            arch: snapshot.arch_info(),
            emu: None,
        };
        let assistant = MipsAssistant::new();

        let beq = branch("beq", &[Some(3), Some(3)]);
        assert_eq!(assistant.condition(&ctx, &beq), Condition::True);
        let bne = branch("bne", &[Some(3), Some(3)]);
        assert_eq!(assistant.condition(&ctx, &bne), Condition::False);
        let bltz = branch("bltz", &[Some(0xffff_fffe)]);
        assert_eq!(assistant.condition(&ctx, &bltz), Condition::True);
        let unknown = branch("beqz", &[None]);
        assert_eq!(assistant.condition(&ctx, &unknown), Condition::Undetermined);
    }

    #[test]
    fn zero_register_is_always_known() {
        let snapshot = Snapshot::new(ArchInfo::new(Architecture::Mips));
        let config = Config::default();
        let ctx = Context {
            process: &snapshot,
            config: &config,
            arch: snapshot.arch_info(),
            emu: None,
        };
        let insn = branch("move", &[]);
        assert_eq!(MipsAssistant::new().read_register(&ctx, &insn, "zero"), Some(0));
        assert_eq!(MipsAssistant::new().read_register(&ctx, &insn, "t0"), None);
    }
}

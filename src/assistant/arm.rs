//! 32-bit ARM and Cortex-M.

use std::collections::HashMap;

use super::aarch64::evaluate_condition_code;
use super::{
    cmp_annotation, generic_register_destination, load_annotation, read_register_name,
    store_annotation, Assistant, Context,
};
use crate::bits::mask;
use crate::instruction::{Condition, Instruction, Operand};

type Handler = fn(&ArmAssistant, &Context, &Instruction) -> Option<String>;

const LOADS: &[(&str, usize)] = &[
    ("ldr", 4),
    ("ldrb", 1),
    ("ldrsb", 1),
    ("ldrh", 2),
    ("ldrsh", 2),
    ("ldrex", 4),
    ("ldrexb", 1),
    ("ldrexh", 2),
];

const STORES: &[(&str, usize)] = &[("str", 4), ("strb", 1), ("strh", 2)];

// Tried longest first so `bls` is b+ls and `bleq` is bl+eq
const BRANCHES: &[&str] = &["blx", "bl", "bx", "b"];

pub struct ArmAssistant {
    handlers: HashMap<&'static str, Handler>,
    loads: HashMap<&'static str, usize>,
    stores: HashMap<&'static str, usize>,
}

impl Default for ArmAssistant {
    fn default() -> Self {
        Self::new()
    }
}

fn flags_register(ctx: &Context) -> &'static str {
    ctx.arch.flags_register().unwrap_or("cpsr")
}

impl ArmAssistant {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        for mnemonic in ["mov", "movw", "movt", "mvn", "adr", "add", "sub"] {
            handlers.insert(mnemonic, |a, ctx, insn| generic_register_destination(a, ctx, insn));
        }
        handlers.insert("cmp", |_, ctx, insn| cmp_annotation(ctx, insn, flags_register(ctx), "-"));
        handlers.insert("cmn", |_, ctx, insn| cmp_annotation(ctx, insn, flags_register(ctx), "+"));
        handlers.insert("tst", |_, ctx, insn| cmp_annotation(ctx, insn, flags_register(ctx), "&"));

        Self {
            handlers,
            loads: LOADS.iter().copied().collect(),
            stores: STORES.iter().copied().collect(),
        }
    }

    /// Condition of a conditional branch from its mnemonic suffix.
    fn branch_condition(&self, ctx: &Context, insn: &Instruction) -> Option<bool> {
        let mnemonic = insn.base_mnemonic();
        let code = BRANCHES.iter().find_map(|branch| {
            let code = mnemonic.strip_prefix(branch)?;
            evaluate_condition_code(code, 0).map(|_| code)
        })?;
        let flags = self.read_register(ctx, insn, flags_register(ctx))?;
        evaluate_condition_code(code, flags)
    }
}

impl Assistant for ArmAssistant {
    fn read_register(&self, ctx: &Context, insn: &Instruction, name: &str) -> Option<u64> {
        match name {
            // The PC reads two instructions ahead
            "pc" => {
                let ahead = if insn.mode.is_thumb() { 4 } else { 8 };
                Some(insn.address.wrapping_add(ahead) & mask(32))
            }
            _ => read_register_name(self, ctx, insn, name),
        }
    }

    fn parse_register(&self, ctx: &Context, insn: &Instruction, op: &Operand) -> Option<u64> {
        let value = self.read_register(ctx, insn, op.register()?)?;
        Some(match op.shift {
            Some(shift) => shift.apply(value, 32),
            None => value,
        })
    }

    fn parse_memory(&self, ctx: &Context, insn: &Instruction, op: &Operand) -> Option<u64> {
        let mem = op.memory()?;
        let base_name = mem.base.as_deref()?;
        let mut target = self.read_register(ctx, insn, base_name)?;
        // Thumb literal loads use Align(PC, 4)
        if base_name == "pc" && insn.mode.is_thumb() {
            target &= !3;
        }

        if let Some(index) = &mem.index {
            let mut index = self.read_register(ctx, insn, index)?;
            if let Some(shift) = op.shift {
                index = shift.apply(index, 32);
            }
            target = if op.subtracted || mem.scale < 0 {
                target.wrapping_sub(index)
            } else {
                target.wrapping_add(index)
            };
        }
        Some(target.wrapping_add(mem.disp as u64) & mask(32))
    }

    fn condition(&self, ctx: &Context, insn: &Instruction) -> Condition {
        let operand = insn.operands.first().and_then(|op| op.before_value);
        match insn.base_mnemonic() {
            "cbz" => operand.map(|v| Condition::from(v == 0)),
            "cbnz" => operand.map(|v| Condition::from(v != 0)),
            _ if insn.is_jump_like() => self.branch_condition(ctx, insn).map(Condition::from),
            _ => None,
        }
        .unwrap_or(Condition::Undetermined)
    }

    fn annotate(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let mnemonic = insn.base_mnemonic();
        if let Some(size) = self.loads.get(mnemonic) {
            let dest = insn.operands.first()?;
            let source = insn.operands.iter().find(|op| op.is_memory())?;
            return load_annotation(self, ctx, insn, dest, source, *size);
        }
        if let Some(size) = self.stores.get(mnemonic) {
            let [source, dest, ..] = insn.operands.as_slice() else {
                return None;
            };
            return store_annotation(ctx, source, dest, *size);
        }
        let handler = self.handlers.get(mnemonic)?;
        handler(self, ctx, insn)
    }
}

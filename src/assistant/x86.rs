use std::collections::HashMap;

use super::{
    cmp_annotation, load_annotation, read_register_name, resolve_target, telescope,
    telescope_format, Assistant, Context,
};
use crate::format::{address_and_symbol, address_or_symbol, format_small_int_pair, plain_address};
use crate::instruction::{Condition, Instruction, Operand, OperandKind};

type Handler = fn(&X86Assistant, &Context, &Instruction) -> Option<String>;

const EFLAGS: &str = "eflags";

pub struct X86Assistant {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for X86Assistant {
    fn default() -> Self {
        Self::new()
    }
}

impl X86Assistant {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        for mnemonic in ["mov", "movabs", "movzx", "movd", "movq", "movsxd", "movsx"] {
            handlers.insert(mnemonic, Self::handle_mov);
        }
        handlers.insert("movaps", Self::handle_vmovaps);
        handlers.insert("vmovaps", Self::handle_vmovaps);
        handlers.insert("lea", Self::handle_lea);
        handlers.insert("xchg", Self::handle_xchg);
        handlers.insert("pop", Self::handle_pop);
        handlers.insert("add", Self::handle_add);
        handlers.insert("sub", Self::handle_sub);
        handlers.insert("cmp", Self::handle_cmp);
        handlers.insert("test", Self::handle_test);
        handlers.insert("xor", Self::handle_xor);
        handlers.insert("and", Self::handle_and);
        handlers.insert("inc", Self::handle_inc);
        handlers.insert("dec", Self::handle_inc);
        Self { handlers }
    }

    fn handle_mov(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let [left, right] = insn.operands.as_slice() else {
            return None;
        };
        let value = right.before_value?;

        if left.is_register() && right.is_memory() {
            return load_annotation(self, ctx, insn, left, right, right.size);
        }

        let depth = ctx.telescope_depth();
        let read_size = Some(right.size).filter(|size| *size > 0);
        let (chain, did_telescope) = telescope(self, ctx, insn, value, depth + 1, read_size);

        match left.kind {
            // mov [mem], reg/imm
            OperandKind::Memory(_) => {
                let dest = left.before_value?;
                if !ctx.process.peek(dest) {
                    return Some(format!("<Cannot dereference [{:#x}]>", dest));
                }
                Some(format!(
                    "{} => {}",
                    left.label(),
                    telescope_format(ctx, &chain, depth, did_telescope)
                ))
            }
            OperandKind::Register(_) => Some(format!(
                "{} => {}",
                left.label(),
                telescope_format(ctx, &chain, depth, did_telescope)
            )),
            OperandKind::Immediate(_) => None,
        }
    }

    /// Memory operands of movaps must be aligned to their width (16, 32 or 64 bytes).
    fn handle_vmovaps(&self, _ctx: &Context, insn: &Instruction) -> Option<String> {
        let op = insn.operands.iter().find(|op| op.is_memory())?;
        let address = op.before_value?;
        if op.size > 0 && address & (op.size as u64 - 1) != 0 {
            Some(format!("<[{:#x}] not aligned to {} bytes>", address, op.size))
        } else {
            None
        }
    }

    fn handle_lea(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let [left, right] = insn.operands.as_slice() else {
            return None;
        };
        let address = right.before_value?;
        let depth = ctx.telescope_depth();
        let (chain, did_telescope) = telescope(self, ctx, insn, address, depth, None);
        Some(format!(
            "{} => {}",
            left.label(),
            telescope_format(ctx, &chain, depth, did_telescope)
        ))
    }

    // Uses the values from before the swap, so this works without emulation
    fn handle_xchg(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let [left, right] = insn.operands.as_slice() else {
            return None;
        };
        let left_before = left.before_resolved?;
        let right_before = right.before_resolved?;
        Some(format!(
            "{} => {}, {} => {}",
            left.label(),
            address_or_symbol(ctx.process, right_before),
            right.label(),
            address_or_symbol(ctx.process, left_before)
        ))
    }

    fn handle_pop(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let [dest] = insn.operands.as_slice() else {
            return None;
        };
        if !dest.is_register() {
            return None;
        }

        if let (Some(_), Some(value)) = (ctx.emu, dest.after_value) {
            return Some(format!(
                "{} => {}",
                dest.label(),
                address_and_symbol(ctx.process, value)
            ));
        }

        if self.can_reason_about_process_state(ctx, insn) {
            let sp = ctx.process.sp()?;
            let value = ctx.process.read_pointer(&ctx.arch, sp).ok()?;
            return Some(format!(
                "{} => {}",
                dest.label(),
                address_and_symbol(ctx.process, value)
            ));
        }
        None
    }

    fn arithmetic(&self, ctx: &Context, insn: &Instruction, op: &str) -> Option<String> {
        let [left, right] = insn.operands.as_slice() else {
            return None;
        };

        let expression = match (left.before_resolved, right.before_resolved) {
            (Some(l), Some(r)) => {
                let (l, r) = format_small_int_pair(l, r);
                Some(format!("{} {} {}", l, op, r))
            }
            _ => None,
        };

        match (left.after_resolved, expression) {
            (Some(result), Some(expression)) => Some(format!(
                "{} => {} ({})",
                left.label(),
                address_and_symbol(ctx.process, result),
                expression
            )),
            (Some(result), None) => Some(format!(
                "{} => {}",
                left.label(),
                address_and_symbol(ctx.process, result)
            )),
            (None, Some(expression)) => Some(format!("{} => {}", left.label(), expression)),
            (None, None) => None,
        }
    }

    fn handle_add(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        self.arithmetic(ctx, insn, "+")
    }

    fn handle_sub(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        self.arithmetic(ctx, insn, "-")
    }

    fn handle_cmp(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        cmp_annotation(ctx, insn, EFLAGS, "-")
    }

    fn handle_test(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        cmp_annotation(ctx, insn, EFLAGS, "&")
    }

    fn handle_xor(&self, _ctx: &Context, insn: &Instruction) -> Option<String> {
        let [left, right] = insn.operands.as_slice() else {
            return None;
        };
        // xor a, a is zero wherever the instruction is
        if left.is_register() && left.register() == right.register() {
            return Some(format!("{} => 0", left.label()));
        }
        let result = left.after_resolved?;
        Some(format!("{} => {}", left.label(), plain_address(result)))
    }

    fn handle_and(&self, _ctx: &Context, insn: &Instruction) -> Option<String> {
        let left = insn.operands.first()?;
        let result = left.after_resolved?;
        Some(format!("{} => {}", left.label(), plain_address(result)))
    }

    fn handle_inc(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let op = insn.operands.first()?;
        let result = op.after_resolved?;
        Some(format!(
            "{} => {}",
            op.label(),
            address_and_symbol(ctx.process, result)
        ))
    }
}

impl Assistant for X86Assistant {
    fn read_register(&self, ctx: &Context, insn: &Instruction, name: &str) -> Option<u64> {
        match name {
            // Known from the instruction alone, wherever the PC is
            "rip" | "eip" | "ip" => Some(insn.fall_through()),
            _ => read_register_name(self, ctx, insn, name),
        }
    }

    fn parse_memory(&self, ctx: &Context, insn: &Instruction, op: &Operand) -> Option<u64> {
        let mem = op.memory()?;
        // Segment bases are not visible through the register file
        if mem.segment.is_some() {
            return None;
        }

        let mut target = 0u64;
        if let Some(base) = &mem.base {
            target = target.wrapping_add(self.read_register(ctx, insn, base)?);
        }
        target = target.wrapping_add(mem.disp as u64);
        if let Some(index) = &mem.index {
            let index = self.read_register(ctx, insn, index)?;
            target = target.wrapping_add(index.wrapping_mul(mem.scale as u64));
        }
        Some(target)
    }

    fn resolve_target(&self, ctx: &Context, insn: &Instruction, call: bool) -> Option<u64> {
        if insn.mnemonic != "ret" || insn.operands.len() > 1 {
            return resolve_target(self, ctx, insn, call);
        }
        // The stack only holds the return address while stopped here
        if !self.can_reason_about_process_state(ctx, insn) {
            return resolve_target(self, ctx, insn, call);
        }

        // `ret imm16` releases its bytes after popping, the address is at sp
        let sp = ctx.process.sp()?;
        if ctx.process.peek(sp) {
            ctx.process.read_pointer(&ctx.arch, sp).ok()
        } else {
            None
        }
    }

    fn condition(&self, ctx: &Context, insn: &Instruction) -> Condition {
        if matches!(insn.mnemonic.as_str(), "jmp" | "ret" | "call") {
            return Condition::Undetermined;
        }
        let Some(code) = insn
            .mnemonic
            .strip_prefix("cmov")
            .or_else(|| insn.mnemonic.strip_prefix('j'))
        else {
            return Condition::Undetermined;
        };

        let flags = match ctx.emu {
            Some(emu) => emu.read_register(EFLAGS),
            None if self.can_reason_about_process_state(ctx, insn) => ctx.process.flags(EFLAGS),
            None => None,
        };

        match flags.and_then(|flags| evaluate_condition(code, flags)) {
            Some(taken) => Condition::from(taken),
            None => Condition::Undetermined,
        }
    }

    fn annotate(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let handler = self.handlers.get(insn.mnemonic.as_str())?;
        handler(self, ctx, insn)
    }
}

/// Evaluate a Jcc / CMOVcc condition code against EFLAGS.
fn evaluate_condition(code: &str, eflags: u64) -> Option<bool> {
    let flag = |bit: u32| eflags & (1 << bit) != 0;
    let cf = flag(0);
    let pf = flag(2);
    let zf = flag(6);
    let sf = flag(7);
    let of = flag(11);

    let taken = match code {
        "a" | "nbe" => !(cf || zf),
        "ae" | "nb" | "nc" => !cf,
        "b" | "c" | "nae" => cf,
        "be" | "na" => cf || zf,
        "e" | "z" => zf,
        "g" | "nle" => !zf && sf == of,
        "ge" | "nl" => sf == of,
        "l" | "nge" => sf != of,
        "le" | "ng" => zf || sf != of,
        "ne" | "nz" => !zf,
        "no" => !of,
        "np" | "po" => !pf,
        "ns" => !sf,
        "o" => of,
        "p" | "pe" => pf,
        "s" => sf,
        _ => return None,
    };
    Some(taken)
}

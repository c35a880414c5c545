// Copyright (c) 2026 MCU-Debug Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;

use super::{
    cmp_annotation, generic_register_destination, load_annotation, read_register_name,
    resolve_target, store_annotation, Assistant, Context,
};
use crate::bits::mask;
use crate::instruction::{Condition, Instruction, InstructionGroup, Operand, OperandKind};

type Handler = fn(&Aarch64Assistant, &Context, &Instruction) -> Option<String>;

const CPSR: &str = "cpsr";

/// Single register loads, with the access width in bytes. `None` means the
/// width of the destination register.
const LOADS: &[(&str, Option<usize>)] = &[
    ("ldrb", Some(1)),
    ("ldurb", Some(1)),
    ("ldrsb", Some(1)),
    ("ldursb", Some(1)),
    ("ldrh", Some(2)),
    ("ldurh", Some(2)),
    ("ldrsh", Some(2)),
    ("ldursh", Some(2)),
    ("ldursw", Some(4)),
    ("ldrsw", Some(4)),
    ("ldur", None),
    ("ldr", None),
    ("ldtrb", Some(1)),
    ("ldtrsb", Some(1)),
    ("ldtrh", Some(2)),
    ("ldtrsh", Some(2)),
    ("ldtrsw", Some(4)),
    ("ldtr", None),
    ("ldxrb", Some(1)),
    ("ldxrh", Some(2)),
    ("ldxr", None),
    ("ldarb", Some(1)),
    ("ldarh", Some(2)),
    ("ldar", None),
];

const STORES: &[(&str, Option<usize>)] = &[
    ("strb", Some(1)),
    ("sturb", Some(1)),
    ("strh", Some(2)),
    ("sturh", Some(2)),
    ("stur", None),
    ("str", None),
    ("sttrb", Some(1)),
    ("sttrh", Some(2)),
    ("sttr", None),
    ("stxrb", Some(1)),
    ("stxrh", Some(2)),
    ("stxr", None),
    ("stlrb", Some(1)),
    ("stlrh", Some(2)),
    ("stlr", None),
    ("stlxrb", Some(1)),
    ("stlxrh", Some(2)),
    ("stlxr", None),
];

pub struct Aarch64Assistant {
    handlers: HashMap<&'static str, Handler>,
    loads: HashMap<&'static str, Option<usize>>,
    stores: HashMap<&'static str, Option<usize>>,
}

impl Default for Aarch64Assistant {
    fn default() -> Self {
        Self::new()
    }
}

impl Aarch64Assistant {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
        for mnemonic in ["mov", "adr", "adrp", "add", "sub"] {
            handlers.insert(mnemonic, |a, ctx, insn| generic_register_destination(a, ctx, insn));
        }
        handlers.insert("cmp", |_, ctx, insn| cmp_annotation(ctx, insn, CPSR, "-"));
        handlers.insert("cmn", |_, ctx, insn| cmp_annotation(ctx, insn, CPSR, "+"));
        handlers.insert("tst", |_, ctx, insn| cmp_annotation(ctx, insn, CPSR, "&"));
        handlers.insert("ccmp", |_, ctx, insn| cmp_annotation(ctx, insn, CPSR, ""));
        handlers.insert("ccmn", |_, ctx, insn| cmp_annotation(ctx, insn, CPSR, ""));

        Self {
            handlers,
            loads: LOADS.iter().copied().collect(),
            stores: STORES.iter().copied().collect(),
        }
    }

    fn annotate_load(&self, ctx: &Context, insn: &Instruction, size: Option<usize>) -> Option<String> {
        let dest = insn.operands.first()?;
        let source = insn.operands.iter().skip(1).find(|op| op.is_memory() || op.is_immediate())?;
        let size = size.unwrap_or_else(|| register_width(dest) as usize / 8);
        load_annotation(self, ctx, insn, dest, source, size)
    }

    fn annotate_store(&self, ctx: &Context, insn: &Instruction, size: Option<usize>) -> Option<String> {
        let dest_index = insn.operands.iter().position(|op| op.is_memory())?;
        // stxr w0, x1, [x2]: the value is the register right before the address
        let source = insn.operands.get(dest_index.checked_sub(1)?)?;
        let size = size.unwrap_or_else(|| register_width(source) as usize / 8);
        store_annotation(ctx, source, &insn.operands[dest_index], size)
    }
}

/// 32 for `w` registers, 64 otherwise.
fn register_width(op: &Operand) -> u32 {
    match op.register() {
        Some(name) if name.starts_with('w') => 32,
        _ => 64,
    }
}

/// Evaluate an ARM condition code against the NZCV bits in the top of
/// `flags`. Shared by the 32-bit ARM assistant.
pub(crate) fn evaluate_condition_code(code: &str, flags: u64) -> Option<bool> {
    let n = (flags >> 31) & 1 == 1;
    let z = (flags >> 30) & 1 == 1;
    let c = (flags >> 29) & 1 == 1;
    let v = (flags >> 28) & 1 == 1;

    let taken = match code {
        "eq" => z,
        "ne" => !z,
        "hs" | "cs" => c,
        "lo" | "cc" => !c,
        "mi" => n,
        "pl" => !n,
        "vs" => v,
        "vc" => !v,
        "hi" => c && !z,
        "ls" => !(c && !z),
        "ge" => n == v,
        "lt" => n != v,
        "gt" => !z && n == v,
        "le" => !(!z && n == v),
        // "nv" behaves as "al" on AArch64
        "al" | "nv" => true,
        _ => return None,
    };
    Some(taken)
}

impl Assistant for Aarch64Assistant {
    fn parse_immediate(&self, _ctx: &Context, _insn: &Instruction, op: &Operand) -> Option<u64> {
        let OperandKind::Immediate(value) = op.kind else {
            return None;
        };
        // cmp x8, #1, lsl #12
        Some(match op.shift {
            Some(shift) => shift.apply(value as u64, 64),
            None => value as u64,
        })
    }

    /// Extend first, then shift, at the width of the destination register.
    fn parse_register(&self, ctx: &Context, insn: &Instruction, op: &Operand) -> Option<u64> {
        let mut value = self.read_register(ctx, insn, op.register()?)?;

        let width = match insn.operands.first() {
            Some(first) if first.is_register() => register_width(first),
            _ => 64,
        };
        if let Some(extend) = op.extend {
            value = extend.apply(value) & mask(width);
        }
        if let Some(shift) = op.shift {
            value = shift.apply(value, width) & mask(width);
        }
        Some(value)
    }

    /// `[base, #disp]`, `[base, index, lsl #n]` or `[base, windex, uxtw #n]`.
    fn parse_memory(&self, ctx: &Context, insn: &Instruction, op: &Operand) -> Option<u64> {
        let mem = op.memory()?;
        let base = self.read_register(ctx, insn, mem.base.as_deref()?)?;
        let mut target = base.wrapping_add(mem.disp as u64);

        if let Some(index) = &mem.index {
            let mut index = self.read_register(ctx, insn, index)?;
            if let Some(extend) = op.extend {
                index = extend.apply(index);
            }
            // Always applied to the 64-bit value
            if let Some(shift) = op.shift {
                index = shift.apply(index, 64);
            }
            target = target.wrapping_add(index);
        }
        Some(target)
    }

    fn read_register(&self, ctx: &Context, insn: &Instruction, name: &str) -> Option<u64> {
        match name {
            "xzr" | "wzr" => Some(0),
            _ => read_register_name(self, ctx, insn, name),
        }
    }

    fn condition(&self, ctx: &Context, insn: &Instruction) -> Condition {
        let operand = |i: usize| insn.operands.get(i).and_then(|op| op.before_value);

        if let Some(code) = insn.mnemonic.strip_prefix("b.") {
            let Some(flags) = self.read_register(ctx, insn, CPSR) else {
                return Condition::Undetermined;
            };
            return evaluate_condition_code(code, flags)
                .map(Condition::from)
                .unwrap_or(Condition::Undetermined);
        }

        match insn.mnemonic.as_str() {
            "cbz" => operand(0).map(|v| Condition::from(v == 0)),
            "cbnz" => operand(0).map(|v| Condition::from(v != 0)),
            "tbz" => operand(0)
                .zip(operand(1))
                .map(|(v, bit)| Condition::from(v.checked_shr(bit as u32).unwrap_or(0) & 1 == 0)),
            "tbnz" => operand(0)
                .zip(operand(1))
                .map(|(v, bit)| Condition::from(v.checked_shr(bit as u32).unwrap_or(0) & 1 == 1)),
            _ => None,
        }
        .unwrap_or(Condition::Undetermined)
    }

    /// Every AArch64 branch names its target in the last operand; a bare
    /// `ret` goes through the link register.
    fn resolve_target(&self, ctx: &Context, insn: &Instruction, call: bool) -> Option<u64> {
        let branch = [
            InstructionGroup::Jump,
            InstructionGroup::Call,
            InstructionGroup::Ret,
            InstructionGroup::BranchRelative,
        ]
        .iter()
        .any(|group| insn.has_group(*group));
        if !branch && !insn.is_unconditional_jump() {
            return None;
        }
        if insn.is_call_like() && !call {
            return None;
        }

        if let Some(last) = insn.operands.last() {
            return last.before_value;
        }
        if insn.mnemonic == "ret" {
            return self.read_register(ctx, insn, "lr");
        }
        resolve_target(self, ctx, insn, call)
    }

    fn annotate(&self, ctx: &Context, insn: &Instruction) -> Option<String> {
        let mnemonic = insn.mnemonic.as_str();
        if let Some(size) = self.loads.get(mnemonic) {
            return self.annotate_load(ctx, insn, *size);
        }
        if let Some(size) = self.stores.get(mnemonic) {
            return self.annotate_store(ctx, insn, *size);
        }
        let handler = self.handlers.get(mnemonic)?;
        handler(self, ctx, insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: u64 = 1 << 31;
    const Z: u64 = 1 << 30;
    const C: u64 = 1 << 29;
    const V: u64 = 1 << 28;

    #[test]
    fn nzcv_conditions() {
        assert_eq!(evaluate_condition_code("eq", Z), Some(true));
        assert_eq!(evaluate_condition_code("ne", Z), Some(false));
        assert_eq!(evaluate_condition_code("hi", C), Some(true));
        assert_eq!(evaluate_condition_code("hi", C | Z), Some(false));
        assert_eq!(evaluate_condition_code("ge", N | V), Some(true));
        assert_eq!(evaluate_condition_code("lt", N), Some(true));
        assert_eq!(evaluate_condition_code("al", 0), Some(true));
        assert_eq!(evaluate_condition_code("nv", 0), Some(true));
        assert_eq!(evaluate_condition_code("xx", 0), None);
    }

    #[test]
    fn load_widths() {
        let assistant = Aarch64Assistant::new();
        assert_eq!(assistant.loads.get("ldrb"), Some(&Some(1)));
        assert_eq!(assistant.loads.get("ldr"), Some(&None));
        assert_eq!(assistant.stores.get("stlxrh"), Some(&Some(2)));
    }
}

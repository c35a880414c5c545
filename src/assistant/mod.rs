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

//! Instruction enhancement.
//!
//! An [`Assistant`] supplies the architecture specific pieces (register
//! reads, memory operand addressing, condition codes, branch targets and the
//! per-mnemonic annotations). [`enhance`] drives them in a fixed order:
//! operand values before the instruction runs, one emulator step, operand
//! values after it ran, then condition, `next`/`target` and annotation.
//!
//! Operand values only ever come from two places: the emulator, or the live
//! process when it is stopped exactly at the instruction. Everything else is
//! left unresolved.

pub mod aarch64;
pub mod arm;
pub mod mips;
pub mod x86;

use std::collections::HashMap;

use crate::arch::{ArchInfo, Architecture};
use crate::bits;
use crate::chain;
use crate::config::Config;
use crate::emulator::{Emulation, Emulator};
use crate::error::EmulationError;
use crate::format::{self, address_and_symbol, address_or_symbol, format_flags, format_small_int_pair};
use crate::instruction::{Condition, Instruction, InstructionGroup, Operand, OperandKind};
use crate::process::Debuggee;
use crate::trace_enhancement;

/// Everything an assistant may consult while enhancing one instruction.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub process: &'a dyn Debuggee,
    pub config: &'a Config,
    pub arch: ArchInfo,
    /// Present only when emulated values may be used for this instruction.
    pub emu: Option<&'a dyn Emulator>,
}

impl Context<'_> {
    pub fn telescope_depth(&self) -> usize {
        self.config.telescope_depth
    }
}

pub trait Assistant {
    fn parse_immediate(&self, _ctx: &Context, _insn: &Instruction, op: &Operand) -> Option<u64> {
        match op.kind {
            OperandKind::Immediate(value) => Some(value as u64),
            _ => None,
        }
    }

    fn parse_register(&self, ctx: &Context, insn: &Instruction, op: &Operand) -> Option<u64> {
        let name = op.register()?;
        self.read_register(ctx, insn, name)
    }

    /// Address named by a memory operand. Never dereferences it.
    fn parse_memory(&self, _ctx: &Context, _insn: &Instruction, _op: &Operand) -> Option<u64> {
        None
    }

    fn read_register(&self, ctx: &Context, insn: &Instruction, name: &str) -> Option<u64> {
        read_register_name(self, ctx, insn, name)
    }

    /// Live registers and memory describe this instruction only when the
    /// process is stopped on it.
    fn can_reason_about_process_state(&self, ctx: &Context, insn: &Instruction) -> bool {
        ctx.process.pc() == Some(insn.address)
    }

    /// The value the instruction consumes from `op`.
    fn resolve_used_value(
        &self,
        ctx: &Context,
        insn: &Instruction,
        op: &Operand,
        value: Option<u64>,
    ) -> Option<u64> {
        resolve_used_value(self, ctx, insn, op, value)
    }

    fn condition(&self, _ctx: &Context, _insn: &Instruction) -> Condition {
        Condition::Undetermined
    }

    /// Where the PC goes if this instruction transfers control. Calls only
    /// count when `call` is set.
    fn resolve_target(&self, ctx: &Context, insn: &Instruction, call: bool) -> Option<u64> {
        resolve_target(self, ctx, insn, call)
    }

    fn annotate(&self, _ctx: &Context, _insn: &Instruction) -> Option<String> {
        None
    }
}

/// Used for architectures without a dedicated assistant. Only literal
/// immediates pass through; registers and memory stay unresolved.
pub struct GenericAssistant;

impl Assistant for GenericAssistant {
    fn parse_register(&self, _ctx: &Context, _insn: &Instruction, _op: &Operand) -> Option<u64> {
        None
    }
}

pub fn read_register_name<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
    name: &str,
) -> Option<u64> {
    if let Some(emu) = ctx.emu {
        emu.read_register(name)
    } else if assistant.can_reason_about_process_state(ctx, insn) {
        ctx.process.register(name)
    } else {
        None
    }
}

pub fn resolve_used_value<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
    op: &Operand,
    value: Option<u64>,
) -> Option<u64> {
    let value = value?;
    match op.kind {
        OperandKind::Immediate(_) | OperandKind::Register(_) => Some(value),
        OperandKind::Memory(_) => {
            let size = if op.size == 0 { ctx.arch.ptrsize } else { op.size };
            read_memory(assistant, ctx, insn, value, size)
        }
    }
}

/// Generic branch target: the single operand's value, or for multi-operand
/// branches the rightmost operand that looks like code.
pub fn resolve_target<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
    call: bool,
) -> Option<u64> {
    if insn.is_call_like() {
        if !call {
            return None;
        }
    } else if !(insn.has_group(InstructionGroup::Jump)
        || insn.has_group(InstructionGroup::Call)
        || insn.has_group(InstructionGroup::BranchRelative))
    {
        return None;
    }

    let mask = ctx.arch.ptrmask();
    if let [op] = insn.operands.as_slice() {
        return assistant
            .resolve_used_value(ctx, insn, op, op.before_value)
            .filter(|v| *v != 0)
            .map(|v| v & mask);
    }

    for op in insn.operands.iter().rev() {
        let Some(value) = assistant
            .resolve_used_value(ctx, insn, op, op.before_value)
            .filter(|v| *v != 0)
        else {
            continue;
        };
        let value = value & mask;
        if op.symbol.is_some()
            || ctx
                .process
                .page_containing(value)
                .is_some_and(|page| page.executable)
        {
            return Some(value);
        }
    }
    None
}

/// Chase pointers from `address` as far as it is safe to.
///
/// Returns the chain (never empty, first entry is `address`) and whether
/// memory was trusted enough to attempt a dereference at all.
pub fn telescope<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
    address: u64,
    limit: usize,
    read_size: Option<usize>,
) -> (Vec<u64>, bool) {
    if let Some(emu) = ctx.emu {
        return (emu.telescope(address, limit, read_size), true);
    }

    let narrow = read_size.filter(|size| *size < ctx.arch.ptrsize);

    if assistant.can_reason_about_process_state(ctx, insn) {
        return match narrow {
            // Sub-word values are not pointers, read once
            Some(size) => {
                let mut result = vec![address];
                if let Ok(value) = ctx.process.read_uint(&ctx.arch, address, size) {
                    result.push(value);
                }
                (result, true)
            }
            None => (chain::get(ctx.process, &ctx.arch, address, limit), true),
        };
    }

    // Away from the PC only read-only memory can be trusted.
    let read_only = |addr: u64| {
        ctx.process
            .page_containing(addr)
            .is_some_and(|page| !page.writable)
    };
    if !read_only(address) {
        return (vec![address], false);
    }

    let mut result = vec![address];
    if let Some(size) = narrow {
        if let Ok(value) = ctx.process.read_uint(&ctx.arch, address, size) {
            result.push(value);
        }
        return (result, true);
    }

    let mut current = address;
    for _ in 0..limit {
        if !read_only(current) {
            break;
        }
        let Ok(value) = ctx.process.read_pointer(&ctx.arch, current) else {
            break;
        };
        let value = value & ctx.arch.ptrmask();
        let repeated = result.contains(&value);
        result.push(value);
        if repeated {
            break;
        }
        current = value;
    }
    (result, true)
}

/// One dereference of `size` bytes, if memory at `address` can be trusted.
pub fn read_memory<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
    address: u64,
    size: usize,
) -> Option<u64> {
    let (chain, did_telescope) = telescope(assistant, ctx, insn, address, 1, Some(size));
    if did_telescope {
        chain.get(1).copied()
    } else {
        None
    }
}

/// Render a chain from [`telescope`]. `can_dereference` is its second value:
/// the last link is only inspected further when memory was trusted.
pub fn telescope_format(
    ctx: &Context,
    addresses: &[u64],
    limit: usize,
    can_dereference: bool,
) -> String {
    match ctx.emu {
        Some(emu) => emu.format_telescope(addresses, limit, ctx.config.telescope_string_length),
        None => chain::format(
            ctx.process,
            &ctx.arch,
            addresses,
            limit,
            can_dereference,
            ctx.config.telescope_string_length,
        ),
    }
}

/// `DEST => chain` for instructions whose first operand is a written
/// register. Needs an emulated result.
pub fn generic_register_destination<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
) -> Option<String> {
    let left = insn.operands.first()?;
    let value = left.after_value?;
    let depth = ctx.telescope_depth();
    let (chain, did_telescope) = telescope(
        assistant,
        ctx,
        insn,
        value,
        depth + 1,
        Some(ctx.arch.ptrsize),
    );
    Some(format!(
        "{} => {}",
        left.label(),
        telescope_format(ctx, &chain, depth, did_telescope)
    ))
}

const FLAGS_SPACING: usize = 5;

/// `a OP b`, followed by the flag register the emulator computed.
pub fn cmp_annotation(ctx: &Context, insn: &Instruction, flags_register: &str, op: &str) -> Option<String> {
    let mut annotation = None;

    if let [left, right] = insn.operands.as_slice() {
        if let (Some(l), Some(r)) = (left.before_resolved, right.before_resolved) {
            let (l, r) = format_small_int_pair(l, r);
            annotation = Some(format!("{} {} {}", l, op, r));
        }
    }

    if let Some(flags) = ctx.emu.and_then(|emu| emu.read_register(flags_register)) {
        let shown = format!(
            "{} => {}",
            flags_register.to_uppercase(),
            format_flags(flags, ctx.arch.flag_bits(flags_register))
        );
        annotation = Some(match annotation {
            Some(text) => format!("{}{}{}", text, " ".repeat(FLAGS_SPACING), shown),
            None => shown,
        });
    }
    annotation
}

/// `DEST, [addr] => value` for a register loaded from memory.
pub fn load_annotation<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
    dest: &Operand,
    source: &Operand,
    read_size: usize,
) -> Option<String> {
    let address = source.before_value?;
    let depth = ctx.telescope_depth();
    let (chain, did_telescope) =
        telescope(assistant, ctx, insn, address, depth + 1, Some(read_size));

    let loaded = match chain.as_slice() {
        [_] if did_telescope => Some(format!("<Cannot dereference [{:#x}]>", address)),
        [_] => None,
        [_, rest @ ..] => Some(telescope_format(ctx, rest, depth, did_telescope)),
        [] => None,
    };

    Some(match loaded {
        Some(loaded) => format!("{}, {} => {}", dest.label(), source.label(), loaded),
        None => format!("{}, {}", dest.label(), source.label()),
    })
}

/// `[addr] => value` for a register stored to memory.
pub fn store_annotation(
    ctx: &Context,
    source: &Operand,
    dest: &Operand,
    write_size: usize,
) -> Option<String> {
    dest.before_value?;
    let value = source.before_resolved? & bits::mask((write_size * 8) as u32);
    Some(format!(
        "{} => {}",
        dest.label(),
        address_and_symbol(ctx.process, value)
    ))
}

/// Assistants keyed by architecture, built once and shared by reference.
pub struct AssistantTable {
    assistants: HashMap<Architecture, Box<dyn Assistant>>,
    generic: GenericAssistant,
}

impl Default for AssistantTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AssistantTable {
    pub fn new() -> Self {
        let mut assistants: HashMap<Architecture, Box<dyn Assistant>> = HashMap::new();
        for arch in [Architecture::I8086, Architecture::I386, Architecture::X86_64] {
            assistants.insert(arch, Box::new(x86::X86Assistant::new()));
        }
        assistants.insert(Architecture::Aarch64, Box::new(aarch64::Aarch64Assistant::new()));
        for arch in [Architecture::Arm, Architecture::ArmCortexM] {
            assistants.insert(arch, Box::new(arm::ArmAssistant::new()));
        }
        assistants.insert(Architecture::Mips, Box::new(mips::MipsAssistant::new()));
        Self {
            assistants,
            generic: GenericAssistant,
        }
    }

    pub fn get(&self, arch: Architecture) -> &dyn Assistant {
        match self.assistants.get(&arch) {
            Some(assistant) => assistant.as_ref(),
            None => &self.generic,
        }
    }
}

fn operand_value<A: Assistant + ?Sized>(
    assistant: &A,
    ctx: &Context,
    insn: &Instruction,
    op: &Operand,
) -> Option<u64> {
    match op.kind {
        OperandKind::Immediate(_) => assistant.parse_immediate(ctx, insn, op),
        OperandKind::Register(_) => assistant.parse_register(ctx, insn, op),
        OperandKind::Memory(_) => assistant.parse_memory(ctx, insn, op),
    }
}

/// Enhance `insn` in place.
///
/// `emulation` must sit at `insn.address` when active. It is stepped past the
/// instruction, and left `Off` if it can no longer be trusted for the
/// instructions that follow. Calls are never stepped since `next` steps
/// over them.
pub fn enhance<A: Assistant + ?Sized>(
    assistant: &A,
    insn: &mut Instruction,
    process: &dyn Debuggee,
    config: &Config,
    emulation: &mut Emulation,
) {
    let arch = process.arch();
    let mask = arch.ptrmask();
    let at_pc = process.pc() == Some(insn.address);

    trace_enhancement!(
        "enhancing {:#x}: {} {}",
        insn.address,
        insn.mnemonic,
        insn.op_str
    );

    if let Some(pc) = emulation.active().map(|emu| emu.pc()) {
        if pc != insn.address {
            let err = EmulationError::Diverged {
                expected: insn.address,
                actual: pc,
            };
            log::debug!("dropping emulator: {}", err);
            emulation.discard();
        }
    }

    if emulation.is_active() && insn.blocks_emulation() {
        trace_enhancement!("not emulating {:#x}", insn.address);
        emulation.discard();
    }

    let values_from_emulator =
        config.values_from_emulator() && (at_pc || config.emulate_future_annotations);

    // Values before the instruction executes
    {
        let ctx = Context {
            process,
            config,
            arch,
            emu: emulation.active().filter(|_| values_from_emulator),
        };
        let before: Vec<Option<u64>> = insn
            .operands
            .iter()
            .map(|op| operand_value(assistant, &ctx, insn, op).map(|v| v & mask))
            .collect();
        for (op, value) in insn.operands.iter_mut().zip(before) {
            op.before_value = value;
            op.symbol = value.and_then(|v| process.resolve(v));
        }
        let resolved: Vec<Option<u64>> = insn
            .operands
            .iter()
            .map(|op| assistant.resolve_used_value(&ctx, insn, op, op.before_value))
            .collect();
        for (op, value) in insn.operands.iter_mut().zip(resolved) {
            op.before_resolved = value;
        }
    }

    let step = emulation.active_mut().map(|emu| emu.single_step(false));
    match step {
        Some(Ok(_)) => insn.emulated = true,
        Some(Err(err)) => {
            log::debug!("emulation stopped at {:#x}: {}", insn.address, err);
            emulation.discard();
        }
        None => {}
    }
    let jump_pc = emulation.active().map(|emu| emu.pc());

    {
        let ctx = Context {
            process,
            config,
            arch,
            emu: emulation.active().filter(|_| values_from_emulator),
        };

        if ctx.emu.is_some() {
            let after: Vec<Option<u64>> = insn
                .operands
                .iter()
                .map(|op| operand_value(assistant, &ctx, insn, op).map(|v| v & mask))
                .collect();
            for (op, value) in insn.operands.iter_mut().zip(after) {
                op.after_value = value;
            }
            let resolved: Vec<Option<u64>> = insn
                .operands
                .iter()
                .map(|op| assistant.resolve_used_value(&ctx, insn, op, op.after_value))
                .collect();
            for (op, value) in insn.operands.iter_mut().zip(resolved) {
                op.after_resolved = value;
            }
        }

        for op in insn.operands.iter_mut() {
            op.display = match op.kind {
                OperandKind::Register(ref name) => Some(name.to_uppercase()),
                OperandKind::Memory(_) => op
                    .before_value
                    .map(|v| format!("[{}]", address_or_symbol(process, v))),
                OperandKind::Immediate(_) => op
                    .before_value
                    .map(|v| format::immediate(bits::to_signed(v, arch.ptrbits()))),
            };
        }

        insn.condition = assistant.condition(&ctx, insn);

        // A condition the assistant decided wins over the emulator, which
        // can land on the wrong address (MIPS delay slots).
        let mut next = None;
        if insn.condition == Condition::True {
            next = assistant.resolve_target(&ctx, insn, false);
        }
        if next.is_none() && !insn.is_call_like() && insn.condition != Condition::False {
            next = jump_pc;
        }
        if next.is_none() && insn.is_unconditional_jump() {
            next = assistant.resolve_target(&ctx, insn, false);
        }
        insn.next = next.unwrap_or_else(|| insn.fall_through()) & mask;

        insn.target = assistant
            .resolve_target(&ctx, insn, true)
            .map(|t| t & mask)
            .unwrap_or(insn.next);
        if insn.has_jump_target() {
            insn.target_string = Some(address_or_symbol(process, insn.target));
        }
        insn.target_is_constant = insn
            .operands
            .first()
            .is_some_and(|op| op.is_immediate() && op.before_value.is_some_and(|v| v != 0))
            || (insn.has_jump_target()
                && insn
                    .operands
                    .iter()
                    .any(|op| op.is_immediate() && op.before_value == Some(insn.target)));

        if config.disasm_annotations {
            insn.annotation = assistant.annotate(&ctx, insn);
        }
    }

    trace_enhancement!("{:#?}", insn);
}

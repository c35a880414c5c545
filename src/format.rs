//! Plain-text rendering of addresses, operand values and instruction lines.

use crate::instruction::{Condition, Instruction};
use crate::process::SymbolResolver;

/// Small values print in decimal, anything that looks like an address in hex.
pub fn plain_address(address: u64) -> String {
    if address > 255 {
        format!("{:#x}", address)
    } else {
        address.to_string()
    }
}

pub fn address_or_symbol<S: SymbolResolver + ?Sized>(symbols: &S, address: u64) -> String {
    symbols
        .resolve(address)
        .unwrap_or_else(|| plain_address(address))
}

/// `0x7ffff7fcecd0 (_dl_fini)`, or just the address when there is no symbol.
pub fn address_and_symbol<S: SymbolResolver + ?Sized>(symbols: &S, address: u64) -> String {
    match symbols.resolve(address) {
        Some(name) => format!("{:#x} ({})", address, name),
        None => plain_address(address),
    }
}

pub fn immediate(value: i64) -> String {
    if value.unsigned_abs() < 0x10 {
        value.to_string()
    } else if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{:#x}", value)
    }
}

/// Both operands of an `a OP b` explanation share one radix.
pub fn format_small_int_pair(first: u64, second: u64) -> (String, String) {
    if first < 10 && second < 10 {
        (first.to_string(), second.to_string())
    } else {
        (format!("{:#x}", first), format!("{:#x}", second))
    }
}

/// `[ CF pf AF zf ... ]`: set flags upper case, clear flags lower case.
pub fn format_flags(value: u64, bits: &[(&str, u32)]) -> String {
    let names: Vec<String> = bits
        .iter()
        .map(|(name, bit)| {
            if value & (1u64 << bit) != 0 {
                name.to_uppercase()
            } else {
                name.to_lowercase()
            }
        })
        .collect();
    format!("[ {} ]", names.join(" "))
}

const TARGET_COLUMN: usize = 36;
const ANNOTATION_PADDING: usize = 8;

/// One disassembly line: PC marker, address, taken-branch mark, assembly and
/// either the branch target or the annotation.
pub fn instruction_line(insn: &Instruction, is_current: bool) -> String {
    let pc_marker = if is_current { " ► " } else { "   " };
    let taken = if insn.condition == Condition::True || insn.is_conditional_jump_taken() {
        "✔ "
    } else {
        "  "
    };
    let asm = format!("{}{:<6} {}", taken, insn.mnemonic, insn.op_str);
    let mut line = format!("{}{:#x}    {}", pc_marker, insn.address, asm);

    if insn.has_jump_target() {
        let target = insn
            .target_string
            .clone()
            .unwrap_or_else(|| format!("{:#x}", insn.target));
        let width = TARGET_COLUMN.max(asm.chars().count() + 1);
        let pad = width - asm.chars().count();
        line.push_str(&" ".repeat(pad));
        line.push_str(&format!("<{}>", target));
    } else if let Some(annotation) = &insn.annotation {
        line.push_str(&" ".repeat(ANNOTATION_PADDING));
        line.push_str(annotation);
    }
    line
}
